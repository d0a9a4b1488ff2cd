use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use nfmrad_config::AppConfig;
use nfmrad_engine::command::{CommandBus, CommandContext, CommandRequest};
use nfmrad_engine::repository::CarRepository;
use nfmrad_engine::workspace::Workspace;

use crate::errors::FrontendError;
use crate::store::CarStore;

/// 交互式外壳主循环：逐行读取输入，解析命令名与参数，
/// 经命令总线分发并打印响应。
pub fn run(config: AppConfig, config_path: Option<PathBuf>) -> Result<i32, FrontendError> {
    let mut store = CarStore::new(config, config_path);
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    if !store.has_usable_directory() {
        if !prompt_for_car_directory(&mut store, &mut lines)? {
            // 输入流结束，没拿到可用目录，直接收工。
            return Ok(0);
        }
    }

    let bus = CommandBus::new();
    let mut workspace = Workspace::new();
    println!("[提示] 输入 help 查看命令列表。");

    while let Some(line) = lines.next() {
        let line = line.map_err(FrontendError::Stdin)?;
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let (name, rest) = split_command_name(input);
        let request = CommandRequest {
            name: name.to_string(),
            args: tokenize_arguments(rest),
        };
        let mut context = CommandContext {
            workspace: &mut workspace,
            repository: &mut store,
        };
        let response = bus.dispatch(&request, &mut context);

        match (response.success, &response.message) {
            (true, Some(message)) => println!("{message}"),
            (true, None) => {}
            (false, message) => {
                warn!(command = name, "命令执行失败");
                eprintln!(
                    "[错误] {}",
                    message.as_deref().unwrap_or("未知错误")
                );
            }
        }

        if let Some(code) = response.exit {
            info!(code, "收到退出命令");
            return Ok(code);
        }
    }

    Ok(0)
}

/// 车辆目录缺失时的初始化问答，拿到存在的目录才返回 true。
fn prompt_for_car_directory(
    store: &mut CarStore,
    lines: &mut impl Iterator<Item = io::Result<String>>,
) -> Result<bool, FrontendError> {
    loop {
        print!("请输入车辆文件夹路径: ");
        let _ = io::stdout().flush();
        let Some(line) = lines.next() else {
            return Ok(false);
        };
        let line = line.map_err(FrontendError::Stdin)?;
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        match store.set_directory(Path::new(input)) {
            Ok(path) => {
                println!("车辆目录已设置为：\"{}\"。", path.display());
                return Ok(true);
            }
            Err(err) => {
                eprintln!("[错误] {err}");
            }
        }
    }
}

/// 输入行的首个空白分隔段是命令名，其余部分是参数串。
fn split_command_name(input: &str) -> (&str, &str) {
    match input.find(char::is_whitespace) {
        Some(index) => (&input[..index], &input[index..]),
        None => (input, ""),
    }
}

/// 把参数串切成独立参数。双引号包裹的参数可含空白；
/// 引号未闭合时，余下内容整体丢弃。
fn tokenize_arguments(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut rest = input;
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        if let Some(quoted) = rest.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => {
                    args.push(quoted[..end].to_string());
                    rest = &quoted[end + 1..];
                }
                None => break,
            }
        } else {
            let end = rest
                .find(char::is_whitespace)
                .unwrap_or(rest.len());
            args.push(rest[..end].to_string());
            rest = &rest[end..];
        }
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_name_splits_on_first_whitespace() {
        assert_eq!(split_command_name("load proto"), ("load", " proto"));
        assert_eq!(split_command_name("help"), ("help", ""));
        assert_eq!(
            split_command_name("car.groups.movepoly 0 1 2 3"),
            ("car.groups.movepoly", " 0 1 2 3")
        );
    }

    #[test]
    fn arguments_tokenize_on_whitespace() {
        assert_eq!(tokenize_arguments(" 0 1 2 3"), vec!["0", "1", "2", "3"]);
        assert_eq!(tokenize_arguments(""), Vec::<String>::new());
        assert_eq!(tokenize_arguments("   "), Vec::<String>::new());
    }

    #[test]
    fn quoted_arguments_keep_whitespace() {
        assert_eq!(
            tokenize_arguments(" \"my car\" 12"),
            vec!["my car", "12"]
        );
        assert_eq!(tokenize_arguments("\"\" next"), vec!["", "next"]);
    }

    #[test]
    fn unterminated_quote_drops_the_tail() {
        assert_eq!(tokenize_arguments(" first \"oops"), vec!["first"]);
        assert_eq!(tokenize_arguments("\"oops"), Vec::<String>::new());
    }
}
