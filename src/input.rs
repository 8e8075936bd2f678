//! キーボード入力
//!
//! POKEYのKBCODEは下位6ビットがキー位置、bit6がSHIFT、bit7がCONTROL。

/// SHIFTビット
pub const SHIFT: u8 = 0x40;
/// CONTROLビット
pub const CONTROL: u8 = 0x80;

/// よく使うキーコード
pub mod key {
    pub const RETURN: u8 = 0x0C;
    pub const ESCAPE: u8 = 0x1C;
    pub const SPACE: u8 = 0x21;
    pub const ATARI: u8 = 0x27;
    pub const TAB: u8 = 0x2C;
    pub const BACKSPACE: u8 = 0x34;
    pub const CAPS: u8 = 0x3C;
    pub const HELP: u8 = 0x11;
}

/// (文字, キーコード, SHIFTが必要か)
const KEY_TABLE: &[(char, u8, bool)] = &[
    ('L', 0x00, false),
    ('J', 0x01, false),
    (';', 0x02, false),
    (':', 0x02, true),
    ('K', 0x05, false),
    ('+', 0x06, false),
    ('\\', 0x06, true),
    ('*', 0x07, false),
    ('^', 0x07, true),
    ('O', 0x08, false),
    ('P', 0x0A, false),
    ('U', 0x0B, false),
    ('\n', 0x0C, false),
    ('I', 0x0D, false),
    ('-', 0x0E, false),
    ('_', 0x0E, true),
    ('=', 0x0F, false),
    ('|', 0x0F, true),
    ('V', 0x10, false),
    ('C', 0x12, false),
    ('B', 0x15, false),
    ('X', 0x16, false),
    ('Z', 0x17, false),
    ('4', 0x18, false),
    ('$', 0x18, true),
    ('3', 0x1A, false),
    ('#', 0x1A, true),
    ('6', 0x1B, false),
    ('&', 0x1B, true),
    ('\x1b', 0x1C, false),
    ('5', 0x1D, false),
    ('%', 0x1D, true),
    ('2', 0x1E, false),
    ('"', 0x1E, true),
    ('1', 0x1F, false),
    ('!', 0x1F, true),
    (',', 0x20, false),
    ('[', 0x20, true),
    (' ', 0x21, false),
    ('.', 0x22, false),
    (']', 0x22, true),
    ('N', 0x23, false),
    ('M', 0x25, false),
    ('/', 0x26, false),
    ('?', 0x26, true),
    ('R', 0x28, false),
    ('E', 0x2A, false),
    ('Y', 0x2B, false),
    ('\t', 0x2C, false),
    ('T', 0x2D, false),
    ('W', 0x2E, false),
    ('Q', 0x2F, false),
    ('9', 0x30, false),
    ('(', 0x30, true),
    ('0', 0x32, false),
    (')', 0x32, true),
    ('7', 0x33, false),
    ('\'', 0x33, true),
    ('\x08', 0x34, false),
    ('8', 0x35, false),
    ('@', 0x35, true),
    ('<', 0x36, false),
    ('>', 0x37, false),
    ('F', 0x38, false),
    ('H', 0x39, false),
    ('D', 0x3A, false),
    ('G', 0x3D, false),
    ('S', 0x3E, false),
    ('A', 0x3F, false),
];

/// ASCII文字をキーコードに変換（英字は大小文字とも同じキー）
pub fn keycode_for_ascii(c: char) -> Option<(u8, bool)> {
    let c = c.to_ascii_uppercase();
    let c = if c == '\r' { '\n' } else { c };
    KEY_TABLE
        .iter()
        .find(|&&(ch, _, _)| ch == c)
        .map(|&(_, code, shift)| (code, shift))
}

/// SHIFT / CONTROL込みのKBCODE
pub fn kbcode(code: u8, shift: bool, control: bool) -> u8 {
    let mut value = code & 0x3F;
    if shift {
        value |= SHIFT;
    }
    if control {
        value |= CONTROL;
    }
    value
}
