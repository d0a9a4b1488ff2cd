use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("读取输入失败: {0}")]
    Stdin(#[source] std::io::Error),
}
