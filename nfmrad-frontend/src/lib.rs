pub mod cli;
pub mod errors;
pub mod store;

use std::path::PathBuf;

use errors::FrontendError;
use nfmrad_config::AppConfig;
use tracing::info;

/// 启动交互式命令行外壳，返回退出码。
/// `config_path` 是 `game.setcarfolder` 等命令持久化配置的目标路径。
pub fn run_shell(config: AppConfig, config_path: Option<PathBuf>) -> Result<i32, FrontendError> {
    info!("启动交互式外壳");
    cli::run(config, config_path)
}
