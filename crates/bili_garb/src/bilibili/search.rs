use std::future::Future;

use anyhow::Result;
use chrono::Utc;
use reqwest::Method;
use serde_json::Value;

use crate::bilibili::client::BiliClient;
use crate::bilibili::error::BiliError;
use crate::bilibili::wbi::{encode_wbi, push_param};

const SEARCH_URL: &str = "https://api.bilibili.com/x/web-interface/wbi/search/type";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SearchUserResult {
    pub mid: i64,
    pub uname: String,
    pub face: String,
    pub room_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct SearchPage {
    pub list: Vec<SearchUserResult>,
    pub has_more: bool,
    pub page: u32,
}

/// 单次搜索请求的结果：拿到了数据页，或者命中了凭据失效的特征
#[derive(Debug)]
pub(crate) enum SearchAttempt {
    Page(SearchPage),
    Stale(String),
}

impl BiliClient {
    /// 搜索 UP 主。签名被服务端拒绝（code 非零或返回 v_voucher）时
    /// 视为缓存的会话/key 已失效，强制刷新后重试一次，再失败则放弃。
    /// 网络层错误不参与该重试，直接向上传播
    pub async fn search_users(&self, keyword: &str, page: Option<u32>) -> Result<SearchPage> {
        retry_with_refresh(|force_refresh| async move {
            let session = self.wbi.get_session(&self.client, force_refresh).await?;
            let keys = self.wbi.get_wbi_keys(&self.client, &session, force_refresh).await?;
            let mut params = vec![
                ("search_type".to_owned(), "bili_user".to_owned()),
                ("keyword".to_owned(), keyword.to_owned()),
            ];
            // 未指定页码时不携带 page 参数，服务端默认第一页
            push_param(&mut params, "page", page);
            let query = encode_wbi(params, &keys, Utc::now().timestamp());
            let res = self
                .client
                .request(
                    Method::GET,
                    &format!("{}?{}", SEARCH_URL, query),
                    Some(&session.cookie_header),
                )
                .send()
                .await?
                .error_for_status()?
                .json::<Value>()
                .await?;
            classify_search_response(&res, page.unwrap_or(1))
        })
        .await
    }
}

/// 带强制刷新的重试循环：首次尝试不刷新，凭据失效再强制刷新重试一次，
/// 第二次仍失效则放弃。每次调用最多两次尝试，尝试本身的错误直接向上传播
pub(crate) async fn retry_with_refresh<F, Fut>(mut attempt: F) -> Result<SearchPage>
where
    F: FnMut(bool) -> Fut,
    Fut: Future<Output = Result<SearchAttempt>>,
{
    for n in 0..2 {
        let force_refresh = n > 0;
        match attempt(force_refresh).await? {
            SearchAttempt::Page(result) => return Ok(result),
            SearchAttempt::Stale(reason) => {
                if n == 0 {
                    warn!("搜索请求被拒绝（{}），强制刷新凭据后重试", reason);
                } else {
                    warn!("强制刷新凭据后搜索仍被拒绝（{}）", reason);
                }
            }
        }
    }
    Err(BiliError::AuthRetryExhausted.into())
}

/// 凭据失效的启发式判断放在这里而不是传输层：
/// 传输层只区分 HTTP 成败，「这种响应意味着凭据过期」是搜索组件自己的业务规则
pub(crate) fn classify_search_response(res: &Value, page: u32) -> Result<SearchAttempt> {
    let code = res["code"]
        .as_i64()
        .ok_or_else(|| BiliError::AuthDataShape("搜索响应缺少 code 字段".to_owned()))?;
    if !res["data"]["v_voucher"].is_null() {
        return Ok(SearchAttempt::Stale("返回 v_voucher 风控标记".to_owned()));
    }
    if code != 0 {
        return Ok(SearchAttempt::Stale(format!("code={}", code)));
    }
    let list = res["data"]["result"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some(SearchUserResult {
                        mid: item["mid"].as_i64()?,
                        uname: item["uname"].as_str()?.to_owned(),
                        face: item["upic"].as_str().unwrap_or("").to_owned(),
                        room_id: item["room_id"].as_i64().filter(|&id| id != 0),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    let num_pages = res["data"]["numPages"].as_i64().unwrap_or(0) as u32;
    Ok(SearchAttempt::Page(SearchPage {
        list,
        has_more: num_pages > page,
        page,
    }))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_classify_success_page() {
        let res = json!({
            "code": 0,
            "message": "0",
            "data": {
                "numPages": 3,
                "result": [
                    {"mid": 114514, "uname": "测试用户", "upic": "//i1.hdslb.com/bfs/face/abc.jpg", "room_id": 1919},
                    {"mid": 1919810, "uname": "另一位", "upic": "//i2.hdslb.com/bfs/face/def.jpg", "room_id": 0},
                ],
            },
        });
        let page = match classify_search_response(&res, 1).unwrap() {
            SearchAttempt::Page(page) => page,
            SearchAttempt::Stale(reason) => panic!("unexpected stale: {}", reason),
        };
        assert_eq!(page.list.len(), 2);
        assert_eq!(page.list[0].mid, 114514);
        assert_eq!(page.list[0].room_id, Some(1919));
        assert_eq!(page.list[1].room_id, None);
        assert!(page.has_more);
    }

    #[test]
    fn test_classify_last_page_has_no_more() {
        let res = json!({"code": 0, "data": {"numPages": 2, "result": []}});
        let page = match classify_search_response(&res, 2).unwrap() {
            SearchAttempt::Page(page) => page,
            SearchAttempt::Stale(reason) => panic!("unexpected stale: {}", reason),
        };
        assert!(!page.has_more);
    }

    #[test]
    fn test_classify_nonzero_code_is_stale() {
        let res = json!({"code": -412, "message": "请求被拦截", "data": null});
        assert_matches!(classify_search_response(&res, 1).unwrap(), SearchAttempt::Stale(_));
    }

    #[test]
    fn test_classify_v_voucher_is_stale() {
        let res = json!({"code": 0, "data": {"v_voucher": "voucher_abc123"}});
        assert_matches!(classify_search_response(&res, 1).unwrap(), SearchAttempt::Stale(_));
    }

    #[test]
    fn test_classify_missing_code_is_shape_error() {
        let res = json!({"data": {}});
        assert!(classify_search_response(&res, 1).is_err());
    }

    fn empty_page() -> SearchPage {
        SearchPage {
            list: Vec::new(),
            has_more: false,
            page: 1,
        }
    }

    #[tokio::test]
    async fn test_retry_returns_immediately_on_success() {
        let seen = std::sync::Mutex::new(Vec::new());
        let page = retry_with_refresh(|force_refresh| {
            seen.lock().unwrap().push(force_refresh);
            async { Ok(SearchAttempt::Page(empty_page())) }
        })
        .await
        .unwrap();
        assert_eq!(page.page, 1);
        // 首次成功不触发重试，只有一次尝试且未强制刷新
        assert_eq!(*seen.lock().unwrap(), vec![false]);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_forced_refresh() {
        let seen = std::sync::Mutex::new(Vec::new());
        let page = retry_with_refresh(|force_refresh| {
            seen.lock().unwrap().push(force_refresh);
            async move {
                if force_refresh {
                    Ok(SearchAttempt::Page(empty_page()))
                } else {
                    Ok(SearchAttempt::Stale("返回 v_voucher 风控标记".to_owned()))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(*seen.lock().unwrap(), vec![false, true]);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_one_forced_refresh() {
        let seen = std::sync::Mutex::new(Vec::new());
        let err = retry_with_refresh(|force_refresh| {
            seen.lock().unwrap().push(force_refresh);
            async { Ok(SearchAttempt::Stale("code=-412".to_owned())) }
        })
        .await
        .unwrap_err();
        assert_matches!(err.downcast_ref::<BiliError>(), Some(BiliError::AuthRetryExhausted));
        // 首次不刷新、重试一次强制刷新，之后放弃，总共两次尝试
        assert_eq!(*seen.lock().unwrap(), vec![false, true]);
    }

    #[tokio::test]
    async fn test_retry_propagates_attempt_error_without_retry() {
        let seen = std::sync::Mutex::new(Vec::new());
        let err = retry_with_refresh(|force_refresh| {
            seen.lock().unwrap().push(force_refresh);
            async { Err(anyhow::anyhow!("connection reset")) }
        })
        .await
        .unwrap_err();
        // 网络层错误不算凭据失效，不消耗重试机会
        assert!(err.downcast_ref::<BiliError>().is_none());
        assert_eq!(*seen.lock().unwrap(), vec![false]);
    }
}
