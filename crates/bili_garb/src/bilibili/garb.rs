use anyhow::{ensure, Result};
use reqwest::Method;
use serde_json::Value;

use crate::bilibili::client::BiliClient;
use crate::bilibili::Validate;
use crate::utils::filenamify::filenamify;

const SUIT_SEARCH_URL: &str = "https://api.bilibili.com/x/garb/v2/mall/home/search";
const SUIT_DETAIL_URL: &str = "https://api.bilibili.com/x/garb/mall/item/suit/v2/detail";

const SUIT_PAGE_SIZE: usize = 20;

/// 装扮相关的公开接口，无需登录凭据
pub struct Garb<'a> {
    client: &'a BiliClient,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SuitInfo {
    pub item_id: i64,
    pub name: String,
    pub cover: String,
}

#[derive(Debug, Clone)]
pub struct SuitPage {
    pub list: Vec<SuitInfo>,
    pub has_more: bool,
    pub page: u32,
}

/// 装扮中一个可下载的素材，name 已做文件名清洗
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GarbAsset {
    pub name: String,
    pub url: String,
}

impl<'a> Garb<'a> {
    pub fn new(client: &'a BiliClient) -> Self {
        Self { client }
    }

    pub async fn search_suits(&self, keyword: &str, page: u32) -> Result<SuitPage> {
        let res = self
            .client
            .client
            .request(Method::GET, SUIT_SEARCH_URL, None)
            .query(&[
                ("key_word", keyword),
                ("pn", page.to_string().as_str()),
                ("ps", SUIT_PAGE_SIZE.to_string().as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?
            .validate()?;
        Ok(parse_suit_page(&res, page))
    }

    pub async fn suit_assets(&self, item_id: i64) -> Result<Vec<GarbAsset>> {
        let res = self
            .client
            .client
            .request(Method::GET, SUIT_DETAIL_URL, None)
            .query(&[("item_id", item_id.to_string().as_str()), ("part", "suit")])
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?
            .validate()?;
        parse_suit_assets(&res["data"])
    }
}

fn parse_suit_page(res: &Value, page: u32) -> SuitPage {
    let list: Vec<SuitInfo> = res["data"]["list"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some(SuitInfo {
                        item_id: item["item_id"].as_i64()?,
                        name: item["name"].as_str()?.to_owned(),
                        cover: item["properties"]["image_cover"].as_str().unwrap_or("").to_owned(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    // 搜索接口不返回总页数，满页时认为还有下一页
    let has_more = list.len() >= SUIT_PAGE_SIZE;
    SuitPage { list, has_more, page }
}

/// 展平装扮详情：套装级 properties 加上 suit_items 各分组内条目的 properties，
/// 只保留取值为 URL 的字段
fn parse_suit_assets(data: &Value) -> Result<Vec<GarbAsset>> {
    let mut assets = Vec::new();
    let suit_name = data["name"].as_str().unwrap_or("suit");
    collect_url_properties(suit_name, &data["properties"], &mut assets);
    if let Some(groups) = data["suit_items"].as_object() {
        for items in groups.values() {
            if let Some(items) = items.as_array() {
                for item in items {
                    let item_name = item["name"].as_str().unwrap_or("item");
                    collect_url_properties(item_name, &item["properties"], &mut assets);
                }
            }
        }
    }
    ensure!(!assets.is_empty(), "装扮 {} 中没有可下载的素材", suit_name);
    Ok(assets)
}

fn collect_url_properties(owner: &str, properties: &Value, out: &mut Vec<GarbAsset>) {
    if let Some(map) = properties.as_object() {
        for (key, value) in map {
            if let Some(url) = value.as_str() {
                if url.starts_with("http") {
                    out.push(GarbAsset {
                        name: format!("{}_{}", filenamify(owner), key),
                        url: url.to_owned(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_suit_page() {
        let res = json!({
            "code": 0,
            "data": {
                "list": [
                    {"item_id": 33998, "name": "至尊金色限定", "properties": {"image_cover": "https://i0.hdslb.com/bfs/garb/cover.png"}},
                    {"item_id": 42, "name": "缺封面的装扮", "properties": {}},
                ],
            },
        });
        let page = parse_suit_page(&res, 1);
        assert_eq!(page.list.len(), 2);
        assert_eq!(page.list[0].item_id, 33998);
        assert_eq!(page.list[0].cover, "https://i0.hdslb.com/bfs/garb/cover.png");
        assert_eq!(page.list[1].cover, "");
        // 不足一页，没有下一页
        assert!(!page.has_more);
    }

    #[test]
    fn test_parse_suit_assets_flattens_properties() {
        let data = json!({
            "name": "测试装扮",
            "properties": {
                "image_cover": "https://i0.hdslb.com/bfs/garb/cover.png",
                "fan_share_image": "https://i0.hdslb.com/bfs/garb/share.png",
                "sale_time_begin": "1702204169",
            },
            "suit_items": {
                "skin": [
                    {"name": "皮肤/壁纸", "properties": {"image1_landscape": "https://i0.hdslb.com/bfs/garb/skin.png", "color": "#ffffff"}},
                ],
                "emoji_package": [
                    {"name": "表情包", "properties": {"image": "https://i0.hdslb.com/bfs/garb/emoji.png"}},
                ],
            },
        });
        let mut assets = parse_suit_assets(&data).unwrap();
        assets.sort_by(|a, b| a.url.cmp(&b.url));
        assert_eq!(assets.len(), 4);
        // 非 URL 的属性（纯数字、颜色值）被过滤，名称经过文件名清洗
        assert!(assets.iter().all(|asset| asset.url.starts_with("https://")));
        assert!(assets.iter().any(|asset| asset.name == "皮肤_壁纸_image1_landscape"));
    }

    #[test]
    fn test_parse_suit_assets_empty_is_error() {
        let data = json!({"name": "空装扮", "properties": {}, "suit_items": {}});
        assert!(parse_suit_assets(&data).is_err());
    }
}
