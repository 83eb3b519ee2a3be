use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use once_cell::sync::Lazy;

use crate::bilibili::{CacheStore, FileStore, MemoryStore};

pub static ARGS: Lazy<Args> = Lazy::new(Args::parse);

pub static CONFIG_DIR: Lazy<PathBuf> =
    Lazy::new(|| dirs::config_dir().expect("无法获取配置目录").join("bili-garb"));

pub static CACHE_DIR: Lazy<PathBuf> = Lazy::new(|| dirs::cache_dir().expect("无法获取缓存目录").join("bili-garb"));

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[derive(Parser)]
#[command(name = "bili-garb-rs", version, about)]
pub struct Args {
    /// 日志级别
    #[arg(short = 'l', long, default_value = "info", global = true, env = "BILI_GARB_LOG")]
    pub log_level: String,

    /// 匿名会话与 wbi key 的缓存方式
    #[arg(long, value_enum, default_value_t = CacheBackend::File, global = true)]
    pub cache_backend: CacheBackend,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheBackend {
    /// 进程内缓存，退出即失效
    Memory,
    /// 持久化到缓存目录的 JSON 文件
    File,
}

impl CacheBackend {
    pub fn create_store(&self) -> Box<dyn CacheStore> {
        match self {
            CacheBackend::Memory => Box::new(MemoryStore::new()),
            CacheBackend::File => Box::new(FileStore::new(CACHE_DIR.join("wbi_cache.json"))),
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// 扫码登录并保存会话 cookie
    Login,
    /// 删除已保存的会话 cookie
    Logout,
    /// 搜索 UP 主
    Search {
        keyword: String,
        /// 页码，缺省时由服务端返回第一页
        #[arg(short, long)]
        page: Option<u32>,
    },
    /// 搜索装扮
    Suits {
        keyword: String,
        #[arg(short, long, default_value_t = 1)]
        page: u32,
    },
    /// 列出装扮包含的素材
    Assets { item_id: i64 },
    /// 下载装扮的全部素材
    Download {
        item_id: i64,
        #[arg(short, long, default_value = "./garb")]
        output: PathBuf,
    },
}
