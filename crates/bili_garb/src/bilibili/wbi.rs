use crate::bilibili::credential::WbiKeys;

/// wbi 签名使用的固定置换表，来自公开文档，不可修改
const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29, 28, 14, 39, 12,
    38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25, 54, 21, 56, 59, 6, 63, 57, 62,
    11, 36, 20, 34, 44, 52,
];

/// 将 img_key 与 sub_key 拼接后按置换表打乱，取前 32 位作为混合 key
pub fn mixin_key(img_key: &str, sub_key: &str) -> String {
    let raw: Vec<char> = img_key.chars().chain(sub_key.chars()).collect();
    MIXIN_KEY_ENC_TAB
        .iter()
        .filter_map(|&idx| raw.get(idx).copied())
        .take(32)
        .collect()
}

/// 对参数做 wbi 签名，返回排好序、带 wts 与 w_rid 的完整 query string。
/// 纯函数，相同输入（无论传入顺序）产出字节级一致的结果
pub fn encode_wbi(mut params: Vec<(String, String)>, keys: &WbiKeys, ts: i64) -> String {
    let mixin = mixin_key(&keys.img_key, &keys.sub_key);
    params.push(("wts".to_owned(), ts.to_string()));
    // 参数按 key 的字节序升序排列，保证与 map 的遍历顺序无关
    params.sort_by(|a, b| a.0.cmp(&b.0));
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let digest = md5::compute(format!("{}{}", query, mixin));
    format!("{}&w_rid={}", query, hex::encode(digest.0))
}

/// 追加可选参数，None 直接省略而非序列化为空字符串
pub fn push_param(params: &mut Vec<(String, String)>, key: &str, value: Option<impl ToString>) {
    if let Some(value) = value {
        params.push((key.to_owned(), value.to_string()));
    }
}

/// RFC 3986 形式的百分号编码，空格编码为 %20，保留字符 !'()* 一并编码
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for &byte in input.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keys() -> WbiKeys {
        WbiKeys {
            img_key: "7cd084941338484aae1ad9425b84077c".to_owned(),
            sub_key: "4932caff0ff746eab6f01bf08b70ac45".to_owned(),
        }
    }

    #[test]
    fn test_mixin_key() {
        let keys = test_keys();
        assert_eq!(mixin_key(&keys.img_key, &keys.sub_key), "ea1db124af3c7062474693fa704f4ff8");
    }

    #[test]
    fn test_encode_wbi_reference_vector() {
        // 公开文档中的参考用例
        let params = vec![
            ("foo".to_owned(), "114".to_owned()),
            ("bar".to_owned(), "514".to_owned()),
            ("zab".to_owned(), "1919810".to_owned()),
        ];
        assert_eq!(
            encode_wbi(params, &test_keys(), 1702204169),
            "bar=514&foo=114&wts=1702204169&zab=1919810&w_rid=8f6f2b5b3d485fe1886cec6a0be8c5d4"
        );
    }

    #[test]
    fn test_encode_wbi_order_independent() {
        let forward = vec![
            ("foo".to_owned(), "114".to_owned()),
            ("bar".to_owned(), "514".to_owned()),
        ];
        let reversed = vec![
            ("bar".to_owned(), "514".to_owned()),
            ("foo".to_owned(), "114".to_owned()),
        ];
        assert_eq!(
            encode_wbi(forward, &test_keys(), 1702204169),
            encode_wbi(reversed, &test_keys(), 1702204169)
        );
    }

    #[test]
    fn test_encode_wbi_canonical_order_is_idempotent() {
        let params = vec![
            ("keyword".to_owned(), "测试".to_owned()),
            ("search_type".to_owned(), "bili_user".to_owned()),
            ("page".to_owned(), "1".to_owned()),
        ];
        let signed = encode_wbi(params, &test_keys(), 1702204169);
        let keys: Vec<&str> = signed.split('&').map(|pair| pair.split('=').next().unwrap()).collect();
        // w_rid 追加在末尾，其余部分已按 key 排序，重排后顺序不变
        let (canonical, rid) = keys.split_at(keys.len() - 1);
        assert_eq!(rid, ["w_rid"]);
        let mut sorted = canonical.to_vec();
        sorted.sort_unstable();
        assert_eq!(canonical, sorted.as_slice());
    }

    #[test]
    fn test_percent_encode() {
        assert_eq!(percent_encode("a b"), "a%20b");
        assert_eq!(percent_encode("!'()*"), "%21%27%28%29%2A");
        assert_eq!(percent_encode("A-z_0.~"), "A-z_0.~");
        assert_eq!(percent_encode("测试"), "%E6%B5%8B%E8%AF%95");
    }

    #[test]
    fn test_push_param() {
        let mut params = Vec::new();
        push_param(&mut params, "page", Some(3u32));
        push_param(&mut params, "keyword", None::<String>);
        assert_eq!(params, vec![("page".to_owned(), "3".to_owned())]);
    }
}
