//! エミュレータ構築時の致命的エラー
//!
//! ROMサイズ不正などマシンを起動できない問題のみを扱う。
//! SIOのNAKやCIOのステータスコードはエミュレートされたプロトコル内で
//! 返すため、ここには含めない。

use std::fmt;

/// ROMの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomKind {
    /// OS ROM (16KB)
    Os,
    /// BASIC ROM (8KB)
    Basic,
}

impl fmt::Display for RomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RomKind::Os => write!(f, "OS ROM"),
            RomKind::Basic => write!(f, "BASIC ROM"),
        }
    }
}

/// 致命的エラー
#[derive(Debug)]
pub enum A8Error {
    /// ROMサイズが規定と一致しない
    RomSize {
        kind: RomKind,
        expected: usize,
        actual: usize,
    },
    /// ディスクイメージのヘッダが不正
    DiskImage(String),
    /// スロット番号が範囲外
    InvalidSlot(usize),
    /// 起動に必要なリソースがない
    MissingResource(&'static str),
    /// ホスト側のI/Oエラー
    Io(std::io::Error),
}

impl fmt::Display for A8Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            A8Error::RomSize { kind, expected, actual } => {
                write!(f, "{} must be {} bytes (got {})", kind, expected, actual)
            }
            A8Error::DiskImage(msg) => write!(f, "invalid disk image: {}", msg),
            A8Error::InvalidSlot(slot) => write!(f, "invalid slot: {}", slot),
            A8Error::MissingResource(what) => write!(f, "missing required resource: {}", what),
            A8Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for A8Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            A8Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for A8Error {
    fn from(e: std::io::Error) -> Self {
        A8Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rom_size_message() {
        let err = A8Error::RomSize { kind: RomKind::Os, expected: 16384, actual: 10 };
        assert_eq!(err.to_string(), "OS ROM must be 16384 bytes (got 10)");
    }
}
