/// URL and key helpers / URL与对象键工具函数

/// Encode one path segment (bucket or object key) / 编码单个路径段
///
/// Object keys may contain `/`, which must not split the path.
pub fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// Join a base URL and path segments, encoding each segment / 拼接URL
/// 1. Trailing slashes on the base are dropped / 去掉基础地址末尾的斜杠
/// 2. Every segment is percent-encoded / 每段单独编码
pub fn join_url(base: &str, segments: &[&str]) -> String {
    let mut url = base.trim_end_matches('/').to_string();
    for segment in segments {
        url.push('/');
        url.push_str(&encode_segment(segment));
    }
    url
}

/// Human-readable byte size for logs / 字节数格式化
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

/// Shorten a signed URL for logging, dropping the query string / 截断签名URL
pub fn redact_url(url: &str) -> &str {
    url.split_once('?').map(|(head, _)| head).unwrap_or(url)
}
