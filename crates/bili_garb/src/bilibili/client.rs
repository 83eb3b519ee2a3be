use reqwest::{header, Method};

use crate::bilibili::credential::{CacheStore, WbiCache};

// 一个对 reqwest::Client 的简单封装，用于 Bilibili 请求
#[derive(Clone)]
pub struct Client(reqwest::Client);

impl Client {
    pub fn new() -> Self {
        // 正常访问 api 所必须的 header，作为默认 header 添加到每个请求中
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
            ),
        );
        headers.insert(
            header::REFERER,
            header::HeaderValue::from_static("https://www.bilibili.com"),
        );
        Self(
            reqwest::Client::builder()
                .default_headers(headers)
                .gzip(true)
                .connect_timeout(std::time::Duration::from_secs(10))
                .read_timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build reqwest client"),
        )
    }

    /// 构建请求，cookie_header 存在时作为 Cookie 头附加
    pub fn request(&self, method: Method, url: &str, cookie_header: Option<&str>) -> reqwest::RequestBuilder {
        let mut req = self.0.request(method, url);
        if let Some(cookie_header) = cookie_header {
            req = req.header(header::COOKIE, cookie_header);
        }
        req
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

/// 携带凭据缓存的客户端，搜索等需要签名的请求经由它发出
pub struct BiliClient {
    pub client: Client,
    pub(crate) wbi: WbiCache,
}

impl BiliClient {
    pub fn new(store: Box<dyn CacheStore>) -> Self {
        Self {
            client: Client::new(),
            wbi: WbiCache::new(store),
        }
    }
}
