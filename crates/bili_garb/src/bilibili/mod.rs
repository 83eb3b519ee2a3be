use anyhow::{bail, ensure, Result};

pub use client::{BiliClient, Client};
pub use credential::{
    delete_login_cookie, load_login_cookie, persist_login_cookie, AnonymousSession, CacheStore, FileStore,
    MemoryStore, WbiKeys,
};
pub use error::BiliError;
pub use garb::{Garb, GarbAsset, SuitInfo, SuitPage};
pub use login::{LoginOutcome, LoginState, LoginTicket, PendingKind, QrLoginFlow};
pub use search::{SearchPage, SearchUserResult};

mod client;
mod credential;
mod error;
mod garb;
mod login;
mod search;
mod wbi;

/// 校验 Bilibili 标准响应信封 {code, data, message}，code 非零视为请求失败。
/// 注意搜索接口不走这里，code 非零在那边是凭据失效信号而非硬错误
pub(crate) trait Validate {
    type Output;

    fn validate(self) -> Result<Self::Output>;
}

impl Validate for serde_json::Value {
    type Output = serde_json::Value;

    fn validate(self) -> Result<Self::Output> {
        let (code, msg) = match (self["code"].as_i64(), self["message"].as_str()) {
            (Some(code), Some(msg)) => (code, msg),
            _ => bail!("no code or message found"),
        };
        ensure!(code == 0, BiliError::RequestFailed(code, msg.to_owned()));
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_validate() {
        assert!(json!({"code": 0, "message": "0", "data": {}}).validate().is_ok());
        assert!(json!({"code": -412, "message": "请求被拦截"}).validate().is_err());
        assert!(json!({"data": {}}).validate().is_err());
    }
}
