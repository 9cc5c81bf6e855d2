use serde::{Deserialize, Serialize};

/// 邮件发送后端
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmailBackend {
    Smtp,
    /// 只把邮件内容写入日志
    #[default]
    Console,
}

/// SMTP连接加密方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SmtpSecurity {
    #[default]
    Starttls,
    Tls,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub backend: EmailBackend,
    pub host: String,
    pub port: u16,
    pub security: SmtpSecurity,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_email: String,
    pub from_name: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            backend: EmailBackend::Console,
            host: "smtp.gmail.com".to_string(),
            port: 587,
            security: SmtpSecurity::Starttls,
            username: None,
            password: None,
            from_email: "webmaster@localhost".to_string(),
            from_name: None,
            timeout_seconds: 10,
        }
    }
}

impl EmailConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.from_email.is_empty() || !self.from_email.contains('@') {
            return Err(anyhow::anyhow!("发件人地址无效: {}", self.from_email));
        }

        if self.backend == EmailBackend::Smtp {
            if self.host.is_empty() {
                return Err(anyhow::anyhow!("SMTP主机地址不能为空"));
            }

            if self.port == 0 {
                return Err(anyhow::anyhow!("SMTP端口必须大于0"));
            }

            if self.username.is_some() != self.password.is_some() {
                return Err(anyhow::anyhow!("SMTP用户名和密码必须同时配置"));
            }

            if self.timeout_seconds == 0 {
                return Err(anyhow::anyhow!("SMTP超时时间必须大于0"));
            }
        }

        Ok(())
    }

    /// From头，配置了显示名时为 "Name <addr>"
    pub fn from_header(&self) -> String {
        match &self.from_name {
            Some(name) => format!("{} <{}>", name, self.from_email),
            None => self.from_email.clone(),
        }
    }
}
