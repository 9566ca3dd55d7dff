//! 出站分段：把长回复切成不超过传输层限制的若干段
//!
//! 优先在换行处切，其次空格，都没有则在 max_len 处硬切；切点之后的前导换行 / 空格被丢弃。
//! 长度按字符计。空文本返回一个空段，调用方可以无条件地把按钮挂在第一段上。

/// Telegram 单条消息硬上限
pub const TRANSPORT_MAX_LEN: usize = 4096;

/// 默认分段长度（留出余量）
pub const SAFE_SEGMENT_LEN: usize = 3800;

pub fn split_text(text: &str, max_len: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![String::new()];
    }
    let max_len = max_len.max(1);

    let mut parts = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        // 第 max_len 个字符的字节偏移；不存在说明剩余部分放得下
        let Some((window_end, _)) = remaining.char_indices().nth(max_len) else {
            parts.push(remaining.to_string());
            break;
        };

        let window = &remaining[..window_end];
        let cut = last_break(window, '\n')
            .or_else(|| last_break(window, ' '))
            .unwrap_or(window_end);

        parts.push(remaining[..cut].to_string());
        remaining = remaining[cut..].trim_start_matches(['\n', ' ']);
    }
    parts
}

/// 切点为 0 会产生空段，视为没有切点
fn last_break(window: &str, sep: char) -> Option<usize> {
    window.rfind(sep).filter(|&i| i > 0)
}
