use serde::{Deserialize, Serialize};

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://livefollow.db".to_string(),
            max_connections: 5,
            min_connections: 1,
            connection_timeout_seconds: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            return Err(anyhow::anyhow!("数据库URL不能为空"));
        }
        if !self.url.starts_with("sqlite:") {
            return Err(anyhow::anyhow!("数据库URL必须是SQLite格式"));
        }
        if self.max_connections == 0 {
            return Err(anyhow::anyhow!("最大连接数必须大于0"));
        }
        if self.min_connections > self.max_connections {
            return Err(anyhow::anyhow!("最小连接数不能大于最大连接数"));
        }
        Ok(())
    }
}

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 同时执行的任务上限
    pub max_concurrent_executions: usize,
    /// 定时器晚于触发时间超过该值则跳过执行（秒）
    pub misfire_grace_seconds: u64,
    /// 定时器与存储对账的间隔（秒）
    pub reconcile_interval_seconds: u64,
    /// 待触发任务超过触发时间多久视为陈旧（秒）
    pub stale_task_threshold_seconds: u64,
    /// 已执行结束的任务保留时长（秒），统计和重试查询依赖这些行
    pub expired_retention_seconds: u64,
    /// 单次自动化调用的超时（秒）
    pub automation_timeout_seconds: u64,
    /// 所有执行器串行使用自动化会话
    pub serialize_automation: bool,
    /// 维护循环中同步开播时间表
    pub sync_live_times: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 4,
            misfire_grace_seconds: 30,
            reconcile_interval_seconds: 300,
            stale_task_threshold_seconds: 3600,
            expired_retention_seconds: 86400,
            automation_timeout_seconds: 120,
            serialize_automation: true,
            sync_live_times: true,
        }
    }
}

/// 各类任务的时间间隔（秒）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalConfig {
    /// 相邻弹幕的发送间隔
    pub bullet_screen_send: u64,
    /// 弹幕发送失败后的重试间隔
    pub bullet_screen_retry: u64,
    /// 跟播失败后的重试间隔
    pub follow_task_retry: u64,
    /// 图像识别未命中后的重试间隔
    pub image_recognition_retry: u64,
    /// 开播时间表同步间隔
    pub live_room_check: u64,
    /// 立即跟播的启动延迟
    pub immediate_follow_delay: u64,
    /// 图像匹配成功后第一条弹幕的延迟，未设置时等于发送间隔
    pub danmu_first_delay: Option<u64>,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            bullet_screen_send: 500,
            bullet_screen_retry: 10,
            follow_task_retry: 60,
            image_recognition_retry: 60,
            live_room_check: 300,
            immediate_follow_delay: 3,
            danmu_first_delay: None,
        }
    }
}

impl IntervalConfig {
    pub fn first_danmu_delay(&self) -> u64 {
        self.danmu_first_delay.unwrap_or(self.bullet_screen_send)
    }
}

/// 重试策略配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    pub max_follow_retry: i32,
    pub max_bullet_retry: i32,
    /// 图像识别的最大尝试次数，未设置时不限次数
    pub max_image_retry: Option<u32>,
    pub enable_auto_retry: bool,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_follow_retry: 3,
            max_bullet_retry: 3,
            max_image_retry: None,
            enable_auto_retry: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub enable_notifications: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            enable_notifications: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub log_capacity: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            log_capacity: crate::progress::DEFAULT_PROGRESS_CAPACITY,
        }
    }
}

/// 外部命令描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// 自动化桥接配置，每个能力对应一个外部程序
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub enter_command: Option<CommandSpec>,
    pub match_command: Option<CommandSpec>,
    pub send_command: Option<CommandSpec>,
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
    /// Prometheus 指标监听地址，未设置时不启动导出器
    pub metrics_listen_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_listen_address: None,
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(anyhow::anyhow!("无效的日志级别: {}", self.log_level));
        }
        if !["json", "pretty"].contains(&self.log_format.as_str()) {
            return Err(anyhow::anyhow!("不支持的日志格式: {}", self.log_format));
        }
        Ok(())
    }
}
