//! プロトコルトレース
//!
//! 原則:
//! 1. 毎サイクルの出来事ではなく「判断」を記録
//! 2. フレーム単位・コマンド単位でのみ出力
//! 3. カテゴリ分離: SIO / CIO / DLIST / IRQ
//!
//! 出力はすべて `log::debug!` 経由。カテゴリが無効なら何もしない。

use std::sync::atomic::{AtomicU32, Ordering};

bitflags::bitflags! {
    /// トレースカテゴリ
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TraceFlags: u32 {
        /// シリアルI/O（コマンドフレーム、応答）
        const SIO   = 0b0001;
        /// 仮想ファイルシステムデバイス（CIO呼び出し）
        const CIO   = 0b0010;
        /// ディスプレイリスト命令
        const DLIST = 0b0100;
        /// 割り込み発生
        const IRQ   = 0b1000;
    }
}

/// グローバルトレースレベル
static TRACE_LEVEL: AtomicU32 = AtomicU32::new(0);

/// トレースレベルを設定
pub fn set_trace_level(level: TraceFlags) {
    TRACE_LEVEL.store(level.bits(), Ordering::Relaxed);
}

/// 現在のトレースレベルを取得
pub fn trace_level() -> TraceFlags {
    TraceFlags::from_bits_truncate(TRACE_LEVEL.load(Ordering::Relaxed))
}

/// カテゴリが有効かチェック
#[inline]
pub fn is_enabled(flag: TraceFlags) -> bool {
    (TRACE_LEVEL.load(Ordering::Relaxed) & flag.bits()) != 0
}

/// "sio+cio" 形式の文字列をパース
pub fn parse_trace_flags(s: &str) -> TraceFlags {
    let mut level = TraceFlags::empty();

    for part in s.to_lowercase().split('+') {
        match part.trim() {
            "none" | "" => {}
            "sio" => level |= TraceFlags::SIO,
            "cio" => level |= TraceFlags::CIO,
            "dlist" => level |= TraceFlags::DLIST,
            "irq" => level |= TraceFlags::IRQ,
            "all" => level = TraceFlags::all(),
            other => log::warn!("Unknown trace category: {}", other),
        }
    }

    level
}

// ============================================================
// トレース出力関数
// ============================================================

/// [SIO] コマンドフレーム受信
pub fn trace_sio_command(frame: &[u8], valid: bool) {
    if is_enabled(TraceFlags::SIO) {
        log::debug!(
            "[SIO] Command {:02X?} {}",
            frame,
            if valid { "OK" } else { "BAD CHECKSUM" }
        );
    }
}

/// [SIO] 応答キュー
pub fn trace_sio_response(first: u8, len: usize) {
    if is_enabled(TraceFlags::SIO) {
        log::debug!("[SIO] Response '{}' ({} bytes queued)", first as char, len);
    }
}

/// [SIO] データフレーム受信
pub fn trace_sio_data(len: usize, valid: bool) {
    if is_enabled(TraceFlags::SIO) {
        log::debug!("[SIO] Data frame {} bytes {}", len, if valid { "OK" } else { "BAD CHECKSUM" });
    }
}

/// [CIO] デバイスコール
pub fn trace_cio(channel: usize, command: u8, status: u8) {
    if is_enabled(TraceFlags::CIO) {
        log::debug!("[CIO] IOCB#{} cmd=${:02X} -> status {}", channel, command, status);
    }
}

/// [DLIST] 命令フェッチ
pub fn trace_dlist(scanline: u32, addr: u16, cmd: u8) {
    if is_enabled(TraceFlags::DLIST) {
        log::debug!("[DLIST] line {:3} ${:04X}: {:02X}", scanline, addr, cmd);
    }
}

/// [IRQ] 割り込み要求
pub fn trace_irq(source: &str, cycle: u64) {
    if is_enabled(TraceFlags::IRQ) {
        log::debug!("[IRQ] {} at cycle {}", source, cycle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trace_flags() {
        assert_eq!(parse_trace_flags("sio+CIO"), TraceFlags::SIO | TraceFlags::CIO);
        assert_eq!(parse_trace_flags("all"), TraceFlags::all());
        assert_eq!(parse_trace_flags("none"), TraceFlags::empty());
    }

    #[test]
    fn test_trace_level() {
        set_trace_level(TraceFlags::SIO | TraceFlags::DLIST);
        assert!(is_enabled(TraceFlags::SIO));
        assert!(is_enabled(TraceFlags::DLIST));
        assert!(!is_enabled(TraceFlags::CIO));
        assert!(!is_enabled(TraceFlags::IRQ));
        assert_eq!(trace_level(), TraceFlags::SIO | TraceFlags::DLIST);
        set_trace_level(TraceFlags::empty());
    }
}
