use std::path::Path;

use anyhow::Result;
use futures::TryStreamExt;
use reqwest::Method;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

use crate::bilibili::Client;

// 素材 CDN 校验 Referer，Downloader 使用带默认 Header 的 Client 构建，
// 下载本身不需要任何 cookie 凭证
pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn fetch(&self, url: &str, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await?;
            }
        }
        let res = self
            .client
            .request(Method::GET, url, None)
            .send()
            .await?
            .error_for_status()?;
        let mut file = File::create(path).await?;
        let mut reader = StreamReader::new(res.bytes_stream().map_err(std::io::Error::other));
        tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        Ok(())
    }
}
