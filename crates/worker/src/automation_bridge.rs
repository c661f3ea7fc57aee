use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use livefollow_core::{
    config::{AutomationConfig, CommandSpec},
    models::Subject,
    traits::{
        AutomationCapability, MatchOutcome, Notifier, PrepareOutcome, SendMode, SendOutcome,
    },
    SchedulerError,
};

/// 外部命令的执行结果
#[derive(Debug)]
struct CommandOutput {
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl CommandOutput {
    fn error_text(&self) -> String {
        if self.stderr.is_empty() {
            format!("命令执行失败，退出码: {:?}", self.exit_code)
        } else {
            self.stderr.clone()
        }
    }
}

/// 通过外部程序完成界面自动化
///
/// 每种能力对应一个配置好的命令，直播间信息以参数传入：
/// `--room-id <ID> --room-name <名称> [--text <话术>] [--dry-run]`。
/// 退出码 0 表示成功（识别命令在 stdout 输出匹配到的图片），
/// 退出码 1 表示业务上的否定结果，其他退出码视为自动化失败。
pub struct CommandAutomation {
    config: AutomationConfig,
}

impl CommandAutomation {
    pub fn new(config: AutomationConfig) -> Self {
        Self { config }
    }

    async fn run(
        &self,
        spec: Option<&CommandSpec>,
        capability: &str,
        subject: &Subject,
        extra_args: &[String],
    ) -> Result<CommandOutput, String> {
        let spec = spec.ok_or_else(|| {
            SchedulerError::Configuration(format!("未配置{capability}命令")).to_string()
        })?;

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .arg("--room-id")
            .arg(subject.id.to_string())
            .arg("--room-name")
            .arg(&subject.name)
            .args(extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        debug!("执行{}命令: {} (直播间 {})", capability, spec.program, subject);
        let output = cmd
            .output()
            .await
            .map_err(|e| format!("启动{capability}命令失败: {e}"))?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

fn mode_args(mode: SendMode) -> Vec<String> {
    match mode {
        SendMode::Commit => Vec::new(),
        SendMode::DryRun => vec!["--dry-run".to_string()],
    }
}

#[async_trait]
impl AutomationCapability for CommandAutomation {
    async fn enter_and_prepare_subject(&self, subject: &Subject, mode: SendMode) -> PrepareOutcome {
        let result = self
            .run(
                self.config.enter_command.as_ref(),
                "进入直播间",
                subject,
                &mode_args(mode),
            )
            .await;
        match result {
            Ok(output) if output.exit_code == Some(0) => PrepareOutcome::Ready,
            Ok(output) if output.exit_code == Some(1) => PrepareOutcome::NotLive,
            Ok(output) => PrepareOutcome::AutomationError(output.error_text()),
            Err(e) => PrepareOutcome::AutomationError(e),
        }
    }

    async fn match_bound_image(&self, subject: &Subject) -> MatchOutcome {
        let result = self
            .run(self.config.match_command.as_ref(), "图像识别", subject, &[])
            .await;
        match result {
            Ok(output) if output.exit_code == Some(0) => MatchOutcome::Matched(output.stdout),
            Ok(output) if output.exit_code == Some(1) => MatchOutcome::NoMatch,
            Ok(output) => {
                let error = output.error_text();
                warn!("图像识别命令出错 ({}): {}", subject, error);
                MatchOutcome::Unavailable(error)
            }
            Err(e) => {
                warn!("图像识别命令不可用: {}", e);
                MatchOutcome::Unavailable(e)
            }
        }
    }

    async fn send_message(&self, subject: &Subject, text: &str, mode: SendMode) -> SendOutcome {
        let mut args = vec!["--text".to_string(), text.to_string()];
        args.extend(mode_args(mode));
        let result = self
            .run(self.config.send_command.as_ref(), "发送消息", subject, &args)
            .await;
        match result {
            Ok(output) if output.exit_code == Some(0) => SendOutcome::Sent,
            Ok(output) => SendOutcome::Failed(output.error_text()),
            Err(e) => SendOutcome::Failed(e),
        }
    }
}

/// 以日志形式输出桌面通知
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify_user(&self, title: &str, message: &str) {
        info!(target: "livefollow::notify", title = %title, "{}", message);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> Option<CommandSpec> {
        Some(CommandSpec {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "automation".to_string()],
        })
    }

    #[tokio::test]
    async fn test_exit_codes_map_to_outcomes() {
        let subject = Subject::new(1, "测试间");
        let automation = CommandAutomation::new(AutomationConfig {
            enter_command: shell("exit 1"),
            match_command: shell("echo product.png"),
            send_command: shell("echo boom >&2; exit 3"),
            working_dir: None,
        });

        assert_eq!(
            automation
                .enter_and_prepare_subject(&subject, SendMode::Commit)
                .await,
            PrepareOutcome::NotLive
        );
        assert_eq!(
            automation.match_bound_image(&subject).await,
            MatchOutcome::Matched("product.png".to_string())
        );
        assert_eq!(
            automation
                .send_message(&subject, "你好", SendMode::DryRun)
                .await,
            SendOutcome::Failed("boom".to_string())
        );
    }

    #[tokio::test]
    async fn test_unconfigured_command_is_automation_error() {
        let automation = CommandAutomation::new(AutomationConfig::default());
        let outcome = automation
            .enter_and_prepare_subject(&Subject::new(1, "A"), SendMode::Commit)
            .await;
        assert!(matches!(outcome, PrepareOutcome::AutomationError(_)));

        match automation.match_bound_image(&Subject::new(1, "A")).await {
            MatchOutcome::Unavailable(e) => assert!(e.contains("未配置图像识别命令")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_match_command_failure_is_not_no_match() {
        let subject = Subject::new(1, "测试间");
        let automation = CommandAutomation::new(AutomationConfig {
            match_command: shell("echo screenshot failed >&2; exit 2"),
            ..AutomationConfig::default()
        });
        assert_eq!(
            automation.match_bound_image(&subject).await,
            MatchOutcome::Unavailable("screenshot failed".to_string())
        );

        let automation = CommandAutomation::new(AutomationConfig {
            match_command: shell("exit 1"),
            ..AutomationConfig::default()
        });
        assert_eq!(automation.match_bound_image(&subject).await, MatchOutcome::NoMatch);
    }
}
