use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use reqwest::{header, Method};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::bilibili::client::Client;
use crate::bilibili::error::BiliError;
use crate::config::CONFIG_DIR;

const SESSION_CACHE_KEY: &str = "anonymous_session";
const WBI_KEYS_CACHE_KEY: &str = "wbi_keys";

/// 匿名会话，由站点首页的 Set-Cookie 拼接而来，仅用于给公开搜索接口签名。
/// 与扫码登录产生的长期凭据是两个不同的东西，后者不会写入本缓存
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymousSession {
    pub cookie_header: String,
}

/// wbi 签名所需的一对轮换 key，取自导航接口返回的两个 URL 的文件名主干
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WbiKeys {
    pub img_key: String,
    pub sub_key: String,
}

/// 凭据缓存的落盘接口，保存失败只记录日志（尽力而为的本地缓存）
pub trait CacheStore: Send + Sync {
    fn load(&self, key: &str) -> Option<String>;
    fn save(&self, key: &str, value: &str);
}

/// 进程内缓存，跟随进程销毁
pub struct MemoryStore {
    entries: std::sync::Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: std::sync::Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for MemoryStore {
    fn load(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn save(&self, key: &str, value: &str) {
        self.entries.lock().unwrap().insert(key.to_owned(), value.to_owned());
    }
}

/// 持久化到 JSON 文件的缓存，跨进程复用匿名会话与 wbi key
pub struct FileStore {
    path: PathBuf,
    entries: std::sync::Mutex<HashMap<String, String>>,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self {
            path,
            entries: std::sync::Mutex::new(entries),
        }
    }
}

impl CacheStore for FileStore {
    fn load(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn save(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_owned(), value.to_owned());
        let serialized = match serde_json::to_string_pretty(&*entries) {
            Ok(serialized) => serialized,
            Err(e) => {
                warn!("序列化凭据缓存失败: {:#}", e);
                return;
            }
        };
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("创建缓存目录失败: {:#}", e);
                return;
            }
        }
        if let Err(e) = std::fs::write(&self.path, serialized) {
            warn!("写入凭据缓存失败: {:#}", e);
        }
    }
}

/// 单个缓存槽位，锁跨越整个刷新过程，
/// 并发调用方会等待同一次刷新完成而不是各自重复发起网络请求
pub(crate) struct CacheSlot<T> {
    inner: Mutex<Option<T>>,
}

impl<T: Clone> CacheSlot<T> {
    pub(crate) fn new() -> Self {
        Self { inner: Mutex::new(None) }
    }

    pub(crate) async fn get_or_refresh<F, Fut>(&self, force: bool, refresh: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut guard = self.inner.lock().await;
        if force {
            // 强制刷新先丢弃旧值，刷新失败时不会退回到过期数据
            *guard = None;
        } else if let Some(value) = guard.as_ref() {
            return Ok(value.clone());
        }
        let fresh = refresh().await?;
        *guard = Some(fresh.clone());
        Ok(fresh)
    }
}

/// 匿名会话与 wbi key 的缓存，按槽位记忆网络请求结果，支持强制刷新
pub struct WbiCache {
    store: Box<dyn CacheStore>,
    session: CacheSlot<AnonymousSession>,
    keys: CacheSlot<WbiKeys>,
}

impl WbiCache {
    pub fn new(store: Box<dyn CacheStore>) -> Self {
        Self {
            store,
            session: CacheSlot::new(),
            keys: CacheSlot::new(),
        }
    }

    pub async fn get_session(&self, client: &Client, force_refresh: bool) -> Result<AnonymousSession> {
        self.session
            .get_or_refresh(force_refresh, || async move {
                if !force_refresh {
                    if let Some(raw) = self.store.load(SESSION_CACHE_KEY) {
                        if let Ok(session) = serde_json::from_str::<AnonymousSession>(&raw) {
                            debug!("命中本地缓存的匿名会话");
                            return Ok(session);
                        }
                    }
                }
                let session = fetch_anonymous_session(client).await?;
                self.store.save(SESSION_CACHE_KEY, &serde_json::to_string(&session)?);
                Ok(session)
            })
            .await
    }

    pub async fn get_wbi_keys(
        &self,
        client: &Client,
        session: &AnonymousSession,
        force_refresh: bool,
    ) -> Result<WbiKeys> {
        self.keys
            .get_or_refresh(force_refresh, || async move {
                if !force_refresh {
                    if let Some(raw) = self.store.load(WBI_KEYS_CACHE_KEY) {
                        if let Ok(keys) = serde_json::from_str::<WbiKeys>(&raw) {
                            debug!("命中本地缓存的 wbi key");
                            return Ok(keys);
                        }
                    }
                }
                let keys = fetch_wbi_keys(client, session).await?;
                self.store.save(WBI_KEYS_CACHE_KEY, &serde_json::to_string(&keys)?);
                Ok(keys)
            })
            .await
    }
}

async fn fetch_anonymous_session(client: &Client) -> Result<AnonymousSession> {
    info!("正在获取匿名会话 cookie..");
    let res = client
        .request(Method::GET, "https://www.bilibili.com/", None)
        .send()
        .await?
        .error_for_status()?;
    let cookie_header = cookie_header_from_response(res.headers());
    ensure!(
        !cookie_header.is_empty(),
        BiliError::AuthDataShape("站点首页未返回任何 Set-Cookie".to_owned())
    );
    Ok(AnonymousSession { cookie_header })
}

async fn fetch_wbi_keys(client: &Client, session: &AnonymousSession) -> Result<WbiKeys> {
    info!("正在获取 wbi key..");
    let res = client
        .request(
            Method::GET,
            "https://api.bilibili.com/x/web-interface/nav",
            Some(&session.cookie_header),
        )
        .send()
        .await?
        .error_for_status()?
        .json::<serde_json::Value>()
        .await?;
    // 匿名访问时导航接口 code 为 -101，但 wbi_img 字段依然有效，故不做 code 校验
    let img_key = key_from_url(res["data"]["wbi_img"]["img_url"].as_str())
        .context("导航接口缺少 img_url")?;
    let sub_key = key_from_url(res["data"]["wbi_img"]["sub_url"].as_str())
        .context("导航接口缺少 sub_url")?;
    Ok(WbiKeys { img_key, sub_key })
}

/// 取 URL 最后一段路径去掉扩展名，即 wbi key 本体
fn key_from_url(url: Option<&str>) -> Result<String> {
    url.and_then(|url| url.rsplit('/').next())
        .and_then(|name| name.split('.').next())
        .filter(|stem| !stem.is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| BiliError::AuthDataShape("wbi_img 字段缺失或格式异常".to_owned()).into())
}

/// 将响应头中的全部 Set-Cookie 拼接为 `name=value; ..` 形式的请求头
pub(crate) fn cookie_header_from_response(headers: &header::HeaderMap) -> String {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|raw| cookie::Cookie::parse(raw).ok())
        .map(|cookie| format!("{}={}", cookie.name(), cookie.value()))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Serialize, Deserialize)]
struct LoginCredential {
    cookie_header: String,
}

fn login_credential_path() -> PathBuf {
    CONFIG_DIR.join("credential.json")
}

/// 扫码登录成功后保存会话 cookie，保存失败是独立于登录流程的错误
pub fn persist_login_cookie(cookie_header: &str) -> Result<()> {
    let credential = LoginCredential {
        cookie_header: cookie_header.to_owned(),
    };
    std::fs::create_dir_all(&*CONFIG_DIR)?;
    std::fs::write(login_credential_path(), serde_json::to_string_pretty(&credential)?)?;
    Ok(())
}

pub fn load_login_cookie() -> Option<String> {
    let raw = std::fs::read_to_string(login_credential_path()).ok()?;
    serde_json::from_str::<LoginCredential>(&raw)
        .ok()
        .map(|credential| credential.cookie_header)
}

pub fn delete_login_cookie() -> Result<()> {
    let path = login_credential_path();
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}
