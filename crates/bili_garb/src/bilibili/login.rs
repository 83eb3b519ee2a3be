use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::bilibili::client::Client;
use crate::bilibili::credential::cookie_header_from_response;
use crate::bilibili::error::BiliError;
use crate::bilibili::Validate;

const QR_GENERATE_URL: &str = "https://passport.bilibili.com/x/passport-login/web/qrcode/generate";
const QR_POLL_URL: &str = "https://passport.bilibili.com/x/passport-login/web/qrcode/poll";

const POLL_INTERVAL: Duration = Duration::from_millis(1500);
/// 连续瞬时错误超过该次数后放弃轮询
const MAX_TRANSIENT_ERRORS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingKind {
    AwaitingScan,
    AwaitingConfirm,
}

/// 扫码登录的全部状态，终态为 Confirmed / Expired / Failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginState {
    Idle,
    Requesting,
    Polling(PendingKind),
    Confirmed(String),
    Expired,
    Failed(String),
}

/// 登录流程的最终结果，Cancelled 表示外部取消、未产生任何终态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Confirmed(String),
    Expired,
    Failed(String),
    Cancelled,
}

/// 一次登录尝试对应的二维码凭据，过期后不可复用
#[derive(Debug, Clone)]
pub struct LoginTicket {
    pub url: String,
    pub qrcode_key: String,
}

/// 单次轮询的分类结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LoginPoll {
    Pending(PendingKind),
    Expired,
    Success(String),
    Transient,
}

/// 扫码登录流程。start() 获取二维码后由调用方负责展示，
/// poll() 以固定间隔串行轮询直到终态或被取消。
/// 登录成功产出的 cookie 交给调用方保存，不会写入匿名凭据缓存
pub struct QrLoginFlow {
    client: Client,
    token: CancellationToken,
    state: watch::Sender<LoginState>,
}

impl QrLoginFlow {
    pub fn new(client: Client) -> Self {
        let (state, _) = watch::channel(LoginState::Idle);
        Self {
            client,
            token: CancellationToken::new(),
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LoginState> {
        self.state.subscribe()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    fn emit(&self, state: LoginState) {
        self.state.send_replace(state);
    }

    /// 请求登录二维码，成功后进入轮询阶段，失败立刻置为终态
    pub async fn start(&self) -> Result<LoginTicket> {
        self.emit(LoginState::Requesting);
        match self.request_ticket().await {
            Ok(ticket) => Ok(ticket),
            Err(e) => {
                warn!("获取登录二维码失败: {:#}", e);
                let reason = "无法获取登录信息".to_owned();
                self.emit(LoginState::Failed(reason.clone()));
                Err(BiliError::LoginFailed(reason).into())
            }
        }
    }

    async fn request_ticket(&self) -> Result<LoginTicket> {
        let res = self
            .client
            .request(Method::GET, QR_GENERATE_URL, None)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?
            .validate()?;
        let url = res["data"]["url"]
            .as_str()
            .ok_or_else(|| BiliError::AuthDataShape("二维码响应缺少 url".to_owned()))?
            .to_owned();
        let qrcode_key = res["data"]["qrcode_key"]
            .as_str()
            .ok_or_else(|| BiliError::AuthDataShape("二维码响应缺少 qrcode_key".to_owned()))?
            .to_owned();
        Ok(LoginTicket { url, qrcode_key })
    }

    /// 轮询扫码状态直到终态。轮询严格串行：上一次请求返回后
    /// 等满间隔再发起下一次（首次轮询不等待）。
    /// 取消在两次轮询之间生效，取消后不再发布任何状态
    pub async fn poll(&self, ticket: &LoginTicket) -> Result<LoginOutcome> {
        self.poll_with(|| self.poll_once(ticket)).await
    }

    /// 轮询主循环，单次请求通过参数注入
    async fn poll_with<F, Fut>(&self, mut poll_once: F) -> Result<LoginOutcome>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<LoginPoll>>,
    {
        let mut progress = PollProgress::default();
        let mut first = true;
        loop {
            if self.token.is_cancelled() {
                return Ok(LoginOutcome::Cancelled);
            }
            if first {
                first = false;
            } else {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => return Ok(LoginOutcome::Cancelled),
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                }
            }
            let poll = match poll_once().await {
                Ok(poll) => poll,
                Err(e) => {
                    debug!("轮询登录状态失败: {:#}", e);
                    LoginPoll::Transient
                }
            };
            // 请求在途时发生的取消也不能漏过
            if self.token.is_cancelled() {
                return Ok(LoginOutcome::Cancelled);
            }
            if let Some(state) = progress.apply(poll) {
                self.emit(state.clone());
                match state {
                    LoginState::Confirmed(cookie_header) => return Ok(LoginOutcome::Confirmed(cookie_header)),
                    LoginState::Expired => return Ok(LoginOutcome::Expired),
                    LoginState::Failed(reason) => return Ok(LoginOutcome::Failed(reason)),
                    _ => {}
                }
            }
        }
    }

    async fn poll_once(&self, ticket: &LoginTicket) -> Result<LoginPoll> {
        let res = self
            .client
            .request(Method::GET, QR_POLL_URL, None)
            .query(&[("qrcode_key", ticket.qrcode_key.as_str())])
            .send()
            .await?
            .error_for_status()?;
        let cookie_header = cookie_header_from_response(res.headers());
        let body = res.json::<Value>().await?;
        Ok(classify_poll(&body, &cookie_header))
    }
}

/// 将轮询响应映射为状态分类，登录成功时凭据来自响应的 Set-Cookie
fn classify_poll(body: &Value, cookie_header: &str) -> LoginPoll {
    match body["data"]["code"].as_i64() {
        Some(86101) => LoginPoll::Pending(PendingKind::AwaitingScan),
        Some(86090) => LoginPoll::Pending(PendingKind::AwaitingConfirm),
        Some(86038) => LoginPoll::Expired,
        Some(0) => {
            if cookie_header.is_empty() {
                // 成功却没有下发 cookie，当作瞬时异常重试
                LoginPoll::Transient
            } else {
                LoginPoll::Success(cookie_header.to_owned())
            }
        }
        _ => LoginPoll::Transient,
    }
}

/// 轮询进度的显式状态机，与计时器解耦便于单测。
/// apply 返回 None 表示维持原状态继续轮询
#[derive(Default)]
struct PollProgress {
    transient_errors: u32,
    pending: Option<PendingKind>,
}

impl PollProgress {
    fn apply(&mut self, poll: LoginPoll) -> Option<LoginState> {
        match poll {
            LoginPoll::Pending(kind) => {
                self.transient_errors = 0;
                if self.pending.as_ref() == Some(&kind) {
                    None
                } else {
                    self.pending = Some(kind.clone());
                    Some(LoginState::Polling(kind))
                }
            }
            LoginPoll::Expired => Some(LoginState::Expired),
            LoginPoll::Success(cookie_header) => Some(LoginState::Confirmed(cookie_header)),
            LoginPoll::Transient => {
                self.transient_errors += 1;
                if self.transient_errors > MAX_TRANSIENT_ERRORS {
                    Some(LoginState::Failed("无法获取登录状态".to_owned()))
                } else {
                    None
                }
            }
        }
    }
}
