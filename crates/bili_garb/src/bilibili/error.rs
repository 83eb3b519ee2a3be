use thiserror::Error;

#[derive(Error, Debug)]
pub enum BiliError {
    #[error("request failed, status code: {0}, message: {1}")]
    RequestFailed(i64, String),
    #[error("auth data shape error: {0}")]
    AuthDataShape(String),
    #[error("auth retry exhausted")]
    AuthRetryExhausted,
    #[error("login qrcode expired")]
    LoginExpired,
    #[error("login failed: {0}")]
    LoginFailed(String),
}

impl BiliError {
    /// 判断错误链中是否存在传输层错误（超时、连接失败）。
    /// 传输层错误与凭据失效是两类问题，后者的识别属于调用方的业务逻辑
    pub fn is_transport_error(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            cause
                .downcast_ref::<reqwest::Error>()
                .is_some_and(|e| e.is_timeout() || e.is_connect())
        })
    }
}
