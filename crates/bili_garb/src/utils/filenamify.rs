/// 将任意字符串清洗为各平台均合法的文件名片段
pub fn filenamify<S: AsRef<str>>(input: S) -> String {
    let mut out = String::new();
    for c in input.as_ref().chars() {
        match c {
            // Windows 不允许的字符与控制字符
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => out.push('_'),
            c if (c as u32) < 0x20 || (c as u32) == 0x7F => out.push('_'),
            _ => out.push(c),
        }
    }
    let out = out.trim_matches(|c| c == ' ' || c == '.').to_string();
    if out.is_empty() {
        "unnamed".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::filenamify;

    #[test]
    fn test_filenamify() {
        assert_eq!(filenamify("foo/bar"), "foo_bar");
        assert_eq!(filenamify("皮肤/壁纸"), "皮肤_壁纸");
        assert_eq!(filenamify("a:b*c?"), "a_b_c_");
        assert_eq!(filenamify("foo\u{0000}bar"), "foo_bar");
        assert_eq!(filenamify("  .."), "unnamed");
        assert_eq!(filenamify(".hidden."), "hidden");
    }
}
