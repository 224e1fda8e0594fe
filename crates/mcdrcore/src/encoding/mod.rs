//! 編解碼模組
//!
//! 處理 MCDR 與伺服器之間的文字編碼：
//! - encoding: MCDR -> 伺服器（寫入 stdin）
//! - decoding: 伺服器 -> MCDR（讀取 stdout）

use std::borrow::Cow;
use std::env;

use encoding_rs::{Encoding, UTF_8};
use thiserror::Error;

/// 編解碼錯誤
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("未知的編碼: {0}")]
    UnknownEncoding(String),

    #[error("無法以 {tried} 解碼文字: {preview}")]
    Decode { tried: String, preview: String },
}

/// 取得平台預設編碼
///
/// 依序讀取 `LC_ALL`、`LC_CTYPE`、`LANG` 的 codeset 部分（例如 `zh_TW.Big5`），
/// 無法判斷時使用 UTF-8
pub fn platform_encoding() -> &'static Encoding {
    ["LC_ALL", "LC_CTYPE", "LANG"]
        .iter()
        .filter_map(|key| env::var(key).ok())
        .find(|value| !value.is_empty())
        .and_then(|locale| locale_encoding(&locale))
        .unwrap_or(UTF_8)
}

/// 從 locale 字串（`language_TERRITORY.codeset@modifier`）解析編碼
fn locale_encoding(locale: &str) -> Option<&'static Encoding> {
    let codeset = locale.split('.').nth(1)?;
    let codeset = codeset.split('@').next()?;
    Encoding::for_label(codeset.as_bytes())
}

/// 解析編碼標籤
pub fn lookup(label: &str) -> Result<&'static Encoding, CodecError> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| CodecError::UnknownEncoding(label.to_string()))
}

/// 伺服器 stdin/stdout 的編解碼器
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    encoding: &'static Encoding,
    decoding: &'static Encoding,
}

impl Codec {
    /// 從設定建立編解碼器，未設定的一側使用平台預設
    pub fn from_labels(encoding: Option<&str>, decoding: Option<&str>) -> Result<Self, CodecError> {
        let encoding = match encoding {
            Some(label) => lookup(label)?,
            None => UTF_8,
        };
        let decoding = match decoding {
            Some(label) => lookup(label)?,
            None => platform_encoding(),
        };
        Ok(Self { encoding, decoding })
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn decoding(&self) -> &'static Encoding {
        self.decoding
    }

    /// 解碼一行伺服器輸出
    ///
    /// 先嘗試 UTF-8，失敗時改用設定的解碼；兩者都失敗則回傳 [`CodecError::Decode`]。
    /// 回傳前會去除前後的換行字元
    pub fn decode_line(&self, bytes: &[u8]) -> Result<String, CodecError> {
        let decoded = UTF_8
            .decode_without_bom_handling_and_without_replacement(bytes)
            .or_else(|| {
                if self.decoding == UTF_8 {
                    None
                } else {
                    self.decoding
                        .decode_without_bom_handling_and_without_replacement(bytes)
                }
            })
            .ok_or_else(|| CodecError::Decode {
                tried: format!("{}, {}", UTF_8.name(), self.decoding.name()),
                preview: String::from_utf8_lossy(bytes).into_owned(),
            })?;

        Ok(trim_line_breaks(decoded).to_string())
    }

    /// 將文字編碼為位元組
    ///
    /// `label` 可覆寫設定的編碼；無法編碼的字元會被替換
    pub fn encode(&self, text: &str, label: Option<&str>) -> Result<Vec<u8>, CodecError> {
        let encoding = match label {
            Some(label) => lookup(label)?,
            None => self.encoding,
        };
        let (encoded, _, _) = encoding.encode(text);
        Ok(encoded.into_owned())
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self {
            encoding: UTF_8,
            decoding: platform_encoding(),
        }
    }
}

fn trim_line_breaks(text: Cow<'_, str>) -> Cow<'_, str> {
    match text {
        Cow::Borrowed(s) => Cow::Borrowed(s.trim_matches(|c| c == '\r' || c == '\n')),
        Cow::Owned(s) => Cow::Owned(s.trim_matches(|c| c == '\r' || c == '\n').to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_utf8_line() {
        let codec = Codec::from_labels(None, Some("utf-8")).unwrap();
        let result = codec.decode_line("你好 world\r\n".as_bytes()).unwrap();
        assert_eq!(result, "你好 world");
    }

    #[test]
    fn test_decode_falls_back_to_configured() {
        // "你好" in Big5: 0xa7 0x41 0xa6 0x6e，並非合法 UTF-8
        let codec = Codec::from_labels(None, Some("big5")).unwrap();
        let result = codec.decode_line(&[0xa7, 0x41, 0xa6, 0x6e, b'\n']).unwrap();
        assert_eq!(result, "你好");
    }

    #[test]
    fn test_decode_error_after_both_attempts() {
        let codec = Codec::from_labels(None, Some("utf-8")).unwrap();
        let result = codec.decode_line(&[0xff, 0xfe, 0xfd]);
        assert!(matches!(result, Err(CodecError::Decode { .. })));
    }

    #[test]
    fn test_encode_with_override() {
        let codec = Codec::from_labels(Some("utf-8"), None).unwrap();
        assert_eq!(codec.encode("你好", Some("big5")).unwrap(), vec![0xa7, 0x41, 0xa6, 0x6e]);
        assert_eq!(codec.encode("Hello", None).unwrap(), b"Hello");
    }

    #[test]
    fn test_unknown_label() {
        let result = Codec::from_labels(Some("not-a-charset"), None);
        assert!(matches!(result, Err(CodecError::UnknownEncoding(_))));
    }

    #[test]
    fn test_locale_encoding() {
        assert_eq!(locale_encoding("zh_TW.Big5"), Some(encoding_rs::BIG5));
        assert_eq!(locale_encoding("en_US.UTF-8@euro"), Some(UTF_8));
        assert_eq!(locale_encoding("C"), None);
    }
}
