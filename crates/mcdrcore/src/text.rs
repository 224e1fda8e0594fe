//! 文字清理工具
//!
//! 伺服器輸出常夾帶 ANSI 轉義碼與 Minecraft `§` 顏色碼，解析前需先移除

/// 移除 ANSI 轉義碼
pub fn strip_ansi(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            // 跳過 CSI 序列
            if chars.peek() == Some(&'[') {
                chars.next();
                while let Some(&ch) = chars.peek() {
                    chars.next();
                    if ch.is_ascii_alphabetic() {
                        break;
                    }
                }
            } else if chars.peek() == Some(&']') {
                // OSC 序列，以 BEL 或 ESC \ 結尾
                chars.next();
                while let Some(ch) = chars.next() {
                    if ch == '\x07' {
                        break;
                    }
                    if ch == '\x1b' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            } else {
                // ESC x 兩字元序列
                chars.next();
            }
        } else {
            result.push(c);
        }
    }

    result
}

/// 移除 Minecraft 顏色碼（`§` 加一個格式字元）
pub fn strip_color_codes(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        if c == '§' {
            chars.next();
        } else {
            result.push(c);
        }
    }

    result
}

/// 截斷過長的文字以便寫入日誌
pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi() {
        let input = "\x1b[31mRed\x1b[0m Normal";
        assert_eq!(strip_ansi(input), "Red Normal");
    }

    #[test]
    fn test_strip_ansi_two_char_sequence() {
        assert_eq!(strip_ansi("\x1bcReset"), "Reset");
    }

    #[test]
    fn test_strip_ansi_osc() {
        assert_eq!(strip_ansi("\x1b]0;Minecraft Server\x07Done"), "Done");
        assert_eq!(strip_ansi("a\x1b]2;title\x1b\\b"), "ab");
    }

    #[test]
    fn test_strip_color_codes() {
        assert_eq!(strip_color_codes("§aGreen §lbold§r text"), "Green bold text");
    }

    #[test]
    fn test_strip_color_code_at_end() {
        assert_eq!(strip_color_codes("dangling§"), "dangling");
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("short", 32), "short");
        assert_eq!(truncate_for_log("abcdef", 3), "abc...");
    }
}
