use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "notifier")]
#[command(version = "1.0.0")]
#[command(about = "预订确认通知的异步投递管道")]
pub struct Cli {
    /// 配置文件路径，未指定时按默认路径搜索
    #[arg(short, long, global = true, env = "NOTIFIER_CONFIG")]
    pub config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(
        short,
        long,
        global = true,
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: Option<String>,

    /// 日志格式，覆盖配置文件
    #[arg(long, global = true, value_parser = ["json", "pretty", "compact"])]
    pub log_format: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 启动Worker，消费并发送通知
    Worker(WorkerArgs),
    /// 提交一条预订确认通知
    Submit(SubmitArgs),
    /// 查看在线Worker
    Inspect(InspectArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct WorkerArgs {
    /// 消费的队列，覆盖 broker.queue
    #[arg(short, long)]
    pub queue: Option<String>,

    /// 并发的分发循环数量，覆盖 worker.concurrency
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// 只运行一个分发循环
    #[arg(long)]
    pub solo: bool,

    /// Worker ID，覆盖 worker.worker_id
    #[arg(long)]
    pub worker_id: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct SubmitArgs {
    #[arg(long)]
    pub booking_id: i64,

    /// 收件人邮箱
    #[arg(long)]
    pub email: String,

    /// 房源名称
    #[arg(long)]
    pub listing: String,

    /// 入住日期 (YYYY-MM-DD)
    #[arg(long)]
    pub check_in: NaiveDate,

    /// 离店日期 (YYYY-MM-DD)
    #[arg(long)]
    pub check_out: NaiveDate,

    #[arg(long)]
    pub guests: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    #[command(subcommand)]
    pub action: InspectAction,

    /// 等待心跳的秒数
    #[arg(long, default_value_t = 2, global = true)]
    pub wait_seconds: u64,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectAction {
    /// 列出在线Worker及最近心跳
    Ping,
    /// 列出每个Worker已注册的任务
    Registered,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_worker_command() {
        let cli = Cli::try_parse_from([
            "notifier",
            "--log-format",
            "json",
            "worker",
            "--queue",
            "priority",
            "--concurrency",
            "8",
            "--worker-id",
            "w-1",
        ])
        .unwrap();

        assert_eq!(cli.log_format.as_deref(), Some("json"));
        match cli.command {
            Commands::Worker(args) => {
                assert_eq!(args.queue.as_deref(), Some("priority"));
                assert_eq!(args.concurrency, Some(8));
                assert_eq!(args.worker_id.as_deref(), Some("w-1"));
                assert!(!args.solo);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_submit_command() {
        let cli = Cli::try_parse_from([
            "notifier",
            "submit",
            "--booking-id",
            "1",
            "--email",
            "user@example.com",
            "--listing",
            "Beach House",
            "--check-in",
            "2025-12-01",
            "--check-out",
            "2025-12-05",
        ])
        .unwrap();

        let Commands::Submit(args) = cli.command else {
            panic!("expected submit");
        };
        assert_eq!(args.booking_id, 1);
        assert_eq!(args.check_in, NaiveDate::from_ymd_opt(2025, 12, 1).unwrap());
        assert_eq!(args.guests, None);
    }

    #[test]
    fn test_parse_inspect_command() {
        let cli =
            Cli::try_parse_from(["notifier", "inspect", "registered", "--wait-seconds", "5"])
                .unwrap();

        let Commands::Inspect(args) = cli.command else {
            panic!("expected inspect");
        };
        assert_eq!(args.action, InspectAction::Registered);
        assert_eq!(args.wait_seconds, 5);
    }

    #[test]
    fn test_rejects_invalid_input() {
        assert!(Cli::try_parse_from(["notifier", "--log-format", "xml", "worker"]).is_err());
        assert!(Cli::try_parse_from([
            "notifier",
            "submit",
            "--booking-id",
            "1",
            "--email",
            "user@example.com",
            "--listing",
            "Beach House",
            "--check-in",
            "2025-13-01",
            "--check-out",
            "2025-12-05",
        ])
        .is_err());
    }
}
