use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::sections::{
    AutomationConfig, DatabaseConfig, FeatureConfig, IntervalConfig, ObservabilityConfig,
    ProgressConfig, RetryPolicyConfig, SchedulerConfig,
};

pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["config/livefollow.toml", "livefollow.toml"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub intervals: IntervalConfig,
    pub retry: RetryPolicyConfig,
    pub features: FeatureConfig,
    pub progress: ProgressConfig,
    pub automation: AutomationConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 依次加载配置文件和 `LIVEFOLLOW__` 前缀的环境变量，缺省字段使用内置默认值
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        match config_path {
            Some(path) if Path::new(path).exists() => {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
            Some(path) if !DEFAULT_CONFIG_PATHS.contains(&path) => {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            _ => {
                if let Some(path) = DEFAULT_CONFIG_PATHS.iter().find(|p| Path::new(p).exists()) {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("LIVEFOLLOW")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;
        self.observability.validate()?;
        if self.scheduler.max_concurrent_executions == 0 {
            return Err(anyhow::anyhow!("最大并发执行数必须大于0"));
        }
        if self.scheduler.automation_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("自动化调用超时时间必须大于0"));
        }
        if self.progress.log_capacity == 0 {
            return Err(anyhow::anyhow!("进度日志容量必须大于0"));
        }
        if self.retry.max_follow_retry < 0 || self.retry.max_bullet_retry < 0 {
            return Err(anyhow::anyhow!("最大重试次数不能为负数"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_product_settings() {
        let config = AppConfig::default();
        assert_eq!(config.intervals.bullet_screen_send, 500);
        assert_eq!(config.intervals.first_danmu_delay(), 500);
        assert_eq!(config.intervals.follow_task_retry, 60);
        assert_eq!(config.retry.max_follow_retry, 3);
        assert!(config.retry.max_image_retry.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [intervals]
            bullet_screen_send = 20
            danmu_first_delay = 5

            [retry]
            max_image_retry = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.intervals.bullet_screen_send, 20);
        assert_eq!(config.intervals.first_danmu_delay(), 5);
        assert_eq!(config.intervals.image_recognition_retry, 60);
        assert_eq!(config.retry.max_image_retry, Some(10));
        assert_eq!(config.database.url, "sqlite://livefollow.db");
    }

    #[test]
    fn test_invalid_database_url_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [database]
            url = "postgresql://localhost/app"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("livefollow.toml");
        std::fs::write(
            &path,
            r#"
            [scheduler]
            max_concurrent_executions = 2

            [automation.send_command]
            program = "send-danmu"
            args = ["--window", "chrome"]
            "#,
        )
        .unwrap();

        let config = AppConfig::load(path.to_str()).unwrap();
        assert_eq!(config.scheduler.max_concurrent_executions, 2);
        let send = config.automation.send_command.unwrap();
        assert_eq!(send.program, "send-danmu");
        assert_eq!(send.args.len(), 2);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        assert!(AppConfig::load(Some("/nonexistent/livefollow.toml")).is_err());
    }
}
