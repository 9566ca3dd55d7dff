//! 报表渲染（纯文本 UTF-8 文档）

use chrono::{DateTime, Local};

use crate::core::StatsSnapshot;
use crate::memory::{Message, UserId};

/// 用户报表中列出的最近回合数
pub const REPORT_RECENT_TURNS: usize = 5;
/// 每个回合截取的字符数
pub const REPORT_LINE_CHARS: usize = 90;

fn format_time(at: Option<DateTime<Local>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "暂无数据".to_string())
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

pub fn user_report_filename(user_id: UserId) -> String {
    format!("report_user_{}.txt", user_id)
}

pub fn answer_filename(user_id: UserId) -> String {
    format!("answer_{}.txt", user_id)
}

pub const ADMIN_REPORT_FILENAME: &str = "report_admin.txt";

/// 个人报表：用户 ID、全局统计、最近几轮对话
pub fn user_report(user_id: UserId, stats: &StatsSnapshot, context: &[Message]) -> String {
    let mut out = String::new();
    out.push_str("个人使用报表\n");
    out.push_str("============\n\n");
    out.push_str(&format!("用户 ID: {}\n", user_id));
    out.push_str(&format!("机器人消息总数: {}\n", stats.total_messages));
    out.push_str(&format!("独立用户数: {}\n\n", stats.active_users));
    out.push_str(&format!("最近的消息（最多 {} 条）:\n", REPORT_RECENT_TURNS));

    let start = context.len().saturating_sub(REPORT_RECENT_TURNS);
    for msg in &context[start..] {
        out.push_str(&format!(
            "  {}: {}\n",
            msg.role.as_str(),
            truncate_chars(&msg.content, REPORT_LINE_CHARS)
        ));
    }
    out
}

/// 汇总报表；usage 为所有提供方累计的 (prompt, completion, total) token
pub fn admin_report(stats: &StatsSnapshot, usage: (u64, u64, u64)) -> String {
    let (prompt, completion, total) = usage;
    format!(
        "机器人汇总报表\n==============\n\n消息总数: {}\n独立用户数: {}\n最近活跃: {}\n\nToken 用量: prompt {} / completion {} / total {}\n",
        stats.total_messages,
        stats.active_users,
        format_time(stats.last_active_at),
        prompt,
        completion,
        total
    )
}

/// 统计文本（菜单按钮与管理面板共用）
pub fn stats_text(stats: &StatsSnapshot, with_last_active: bool) -> String {
    let mut text = format!(
        "📊 机器人统计：\n• 消息总数：{}\n• 独立用户数：{}",
        stats.total_messages, stats.active_users
    );
    if with_last_active {
        text.push_str(&format!("\n• 最近活跃：{}", format_time(stats.last_active_at)));
    }
    text
}
