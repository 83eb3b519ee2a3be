#[macro_use]
extern crate tracing;

mod bilibili;
mod config;
mod downloader;
mod utils;

use std::path::Path;

use anyhow::{ensure, Context, Result};

use crate::bilibili::{
    delete_login_cookie, load_login_cookie, persist_login_cookie, BiliClient, BiliError, Client, Garb, LoginOutcome,
    LoginState, PendingKind, QrLoginFlow,
};
use crate::config::{version, Command, ARGS};
use crate::downloader::Downloader;
use crate::utils::init_logger;

#[tokio::main]
async fn main() {
    init_logger(&ARGS.log_level);
    info!("欢迎使用 bili-garb，当前程序版本：{}", version());
    if let Err(e) = run().await {
        if matches!(e.downcast_ref::<BiliError>(), Some(BiliError::AuthRetryExhausted)) {
            error!("搜索暂不可用，请稍后再试");
        } else if BiliError::is_transport_error(&e) {
            error!("网络异常：{:#}", e);
        } else {
            error!("执行失败：{:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let client = BiliClient::new(ARGS.cache_backend.create_store());
    match &ARGS.command {
        Command::Login => login().await,
        Command::Logout => logout(),
        Command::Search { keyword, page } => search(&client, keyword, *page).await,
        Command::Suits { keyword, page } => suits(&client, keyword, *page).await,
        Command::Assets { item_id } => assets(&client, *item_id).await,
        Command::Download { item_id, output } => download(&client, *item_id, output).await,
    }
}

async fn login() -> Result<()> {
    if load_login_cookie().is_some() {
        info!("检测到已保存的登录凭据，登录成功后将覆盖");
    }
    let flow = QrLoginFlow::new(Client::new());

    // 状态变化只负责播报，终态由 poll 的返回值处理
    let mut rx = flow.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            match state {
                LoginState::Polling(PendingKind::AwaitingScan) => info!("等待扫码.."),
                LoginState::Polling(PendingKind::AwaitingConfirm) => info!("已扫码，请在手机上确认登录.."),
                _ => {}
            }
        }
    });

    let token = flow.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let ticket = flow.start().await?;
    info!("请使用哔哩哔哩手机客户端扫描二维码：{}", ticket.url);
    if webbrowser::open(&ticket.url).is_err() {
        info!("未能自动打开浏览器，请手动将上方链接生成二维码后扫描");
    }

    match flow.poll(&ticket).await? {
        LoginOutcome::Confirmed(cookie_header) => {
            persist_login_cookie(&cookie_header).context("保存登录凭据失败")?;
            info!("登录成功，凭据已保存");
            Ok(())
        }
        LoginOutcome::Expired => {
            warn!("二维码已过期，请重新执行 login 获取新的二维码");
            Err(BiliError::LoginExpired.into())
        }
        LoginOutcome::Failed(reason) => Err(BiliError::LoginFailed(reason).into()),
        LoginOutcome::Cancelled => {
            info!("登录已取消");
            Ok(())
        }
    }
}

fn logout() -> Result<()> {
    if load_login_cookie().is_none() {
        info!("当前没有已保存的登录凭据");
        return Ok(());
    }
    delete_login_cookie()?;
    info!("登录凭据已删除");
    Ok(())
}

async fn search(client: &BiliClient, keyword: &str, page: Option<u32>) -> Result<()> {
    let result = client.search_users(keyword, page).await?;
    if result.list.is_empty() {
        info!("没有找到匹配「{}」的用户", keyword);
        return Ok(());
    }
    for user in &result.list {
        info!("mid={} {} 头像: {}", user.mid, user.uname, user.face);
    }
    info!(
        "第 {} 页，共 {} 条{}",
        result.page,
        result.list.len(),
        if result.has_more { "，还有更多" } else { "" }
    );
    Ok(())
}

async fn suits(client: &BiliClient, keyword: &str, page: u32) -> Result<()> {
    let result = Garb::new(client).search_suits(keyword, page).await?;
    if result.list.is_empty() {
        info!("没有找到匹配「{}」的装扮", keyword);
        return Ok(());
    }
    for suit in &result.list {
        info!("item_id={} {} 封面: {}", suit.item_id, suit.name, suit.cover);
    }
    info!(
        "第 {} 页，共 {} 条{}",
        result.page,
        result.list.len(),
        if result.has_more { "，还有更多" } else { "" }
    );
    Ok(())
}

async fn assets(client: &BiliClient, item_id: i64) -> Result<()> {
    let assets = Garb::new(client).suit_assets(item_id).await?;
    for asset in &assets {
        info!("{} -> {}", asset.name, asset.url);
    }
    info!("装扮 {} 共 {} 个素材", item_id, assets.len());
    Ok(())
}

async fn download(client: &BiliClient, item_id: i64, output: &Path) -> Result<()> {
    let assets = Garb::new(client).suit_assets(item_id).await?;
    info!("装扮 {} 共 {} 个素材，开始下载..", item_id, assets.len());
    let downloader = Downloader::new(client.client.clone());
    let mut failed = 0usize;
    for asset in &assets {
        let path = output.join(format!("{}.{}", asset.name, extension_of(&asset.url)));
        match downloader.fetch(&asset.url, &path).await {
            Ok(()) => info!("已下载 {}", path.display()),
            Err(e) => {
                warn!("下载 {} 失败: {:#}", asset.url, e);
                failed += 1;
            }
        }
    }
    ensure!(failed < assets.len(), "全部 {} 个素材下载失败", assets.len());
    if failed > 0 {
        warn!("有 {} 个素材下载失败", failed);
    }
    info!("下载完成，保存在 {}", output.display());
    Ok(())
}

/// 从素材 URL 推断文件扩展名，推断不出来时退回 bin
fn extension_of(url: &str) -> &str {
    url.split(['?', '#'])
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.len() <= 5)
        .unwrap_or("bin")
}

#[cfg(test)]
mod tests {
    use super::extension_of;

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("https://i0.hdslb.com/bfs/garb/item/cover.png"), "png");
        assert_eq!(extension_of("https://i0.hdslb.com/bfs/garb/item/cover.png?width=100"), "png");
        assert_eq!(extension_of("https://i0.hdslb.com/bfs/garb/item/noext"), "bin");
        assert_eq!(extension_of("https://i0.hdslb.com/bfs/garb/item/weird.verylongext"), "bin");
    }
}
