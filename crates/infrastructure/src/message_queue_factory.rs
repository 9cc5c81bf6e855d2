use std::sync::Arc;
use std::time::Duration;

use notifier_core::{
    config::{BrokerConfig, BrokerType},
    traits::Broker,
    NotifierError, Result,
};
use tracing::{debug, info};

use crate::{InMemoryBroker, RabbitMqBroker};

pub struct BrokerFactory;

impl BrokerFactory {
    /// 根据配置创建消息代理
    pub async fn create(config: &BrokerConfig) -> Result<Arc<dyn Broker>> {
        debug!("Creating broker with type: {:?}", config.r#type);
        Self::validate_config(config)?;

        match config.r#type {
            BrokerType::Rabbitmq => {
                info!("Initializing RabbitMQ broker: {}", config.redacted_url());
                let rabbitmq = RabbitMqBroker::new(config.clone()).await?;
                Ok(Arc::new(rabbitmq))
            }
            BrokerType::Memory => {
                info!("Initializing in-memory broker");
                let memory = InMemoryBroker::with_heartbeat_ttl(Duration::from_secs(
                    config.heartbeat_ttl_seconds,
                ));
                Ok(Arc::new(memory))
            }
        }
    }

    pub fn validate_config(config: &BrokerConfig) -> Result<()> {
        config
            .validate()
            .map_err(|e| NotifierError::Configuration(e.to_string()))
    }

    pub fn get_type_string(broker_type: &BrokerType) -> &'static str {
        match broker_type {
            BrokerType::Rabbitmq => "rabbitmq",
            BrokerType::Memory => "memory",
        }
    }

    pub fn parse_type_string(type_str: &str) -> Result<BrokerType> {
        match type_str.to_lowercase().as_str() {
            "rabbitmq" => Ok(BrokerType::Rabbitmq),
            "memory" => Ok(BrokerType::Memory),
            _ => Err(NotifierError::Configuration(format!(
                "不支持的消息代理类型: {type_str}，支持的类型: rabbitmq, memory"
            ))),
        }
    }
}
