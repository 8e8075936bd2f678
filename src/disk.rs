//! ディスクイメージとSIOディスクプロトコル
//!
//! ATR形式のディスクイメージと、POKEYのシリアル出力から届くバイト列を
//! 解釈するドライブ側の状態機械。
//!
//! - COMMANDフェーズ: 5バイト（デバイス, コマンド, AUX1, AUX2, チェックサム）
//! - DATAフェーズ: 書き込み系コマンドの受理後のみ（ペイロード + チェックサム）
//!
//! 応答はすぐには返さず、遅延付きで入力キューへ積む。

use crate::error::A8Error;
use crate::memory::Memory;
use crate::trace;

/// ATRヘッダのサイズ
pub const ATR_HEADER_SIZE: usize = 16;
/// ATRのマジック（$0296、リトルエンディアン）
const ATR_MAGIC: [u8; 2] = [0x96, 0x02];

/// 先頭3セクタは常に128バイト
const BOOT_SECTOR_SIZE: usize = 128;
const BOOT_SECTORS: usize = 3;

// 応答バイト
pub const SIO_ACK: u8 = b'A';
pub const SIO_NAK: u8 = b'N';
pub const SIO_COMPLETE: u8 = b'C';
pub const SIO_ERROR: u8 = b'E';

// コマンド
const CMD_READ: u8 = 0x52;
const CMD_WRITE: u8 = 0x57;
const CMD_PUT: u8 = 0x50;
const CMD_VERIFY: u8 = 0x56;
const CMD_STATUS: u8 = 0x53;
const CMD_FORMAT: u8 = 0x21;
const CMD_FORMAT_ENHANCED: u8 = 0x22;
const CMD_MOTOR_ON: u8 = 0x55;

/// コマンドフレーム終了からACKまでのサイクル数
pub const SIO_ACK_DELAY: u32 = 1800;
/// ACKからCOMPLETEまでのサイクル数
pub const SIO_COMPLETE_DELAY: u32 = 1500;
/// 1バイトの転送時間（19200ボー、10ビット）
pub const SIO_BYTE_CYCLES: u32 = 930;

/// SIOチェックサム（桁上がりを最下位へ戻す加算）
pub fn sio_checksum(data: &[u8]) -> u8 {
    let mut sum: u16 = 0;
    for &b in data {
        sum += b as u16;
        if sum > 0xFF {
            sum = (sum & 0xFF) + 1;
        }
    }
    sum as u8
}

/// ディスクイメージ（ATR）
#[derive(Debug, Clone)]
pub struct DiskImage {
    /// 表示用の名前
    pub name: String,
    /// ヘッダを含むイメージ全体
    data: Vec<u8>,
    /// 4番目以降のセクタサイズ（128 / 256）
    sector_size: usize,
    /// 書き込み可能か
    pub writable: bool,
}

impl DiskImage {
    /// ATRイメージを検証して作成
    pub fn from_atr(name: &str, data: Vec<u8>) -> Result<Self, A8Error> {
        if data.len() < ATR_HEADER_SIZE {
            return Err(A8Error::DiskImage(format!("{}: too short for an ATR header", name)));
        }
        if data[0..2] != ATR_MAGIC {
            return Err(A8Error::DiskImage(format!(
                "{}: bad ATR magic {:02X} {:02X}",
                name, data[0], data[1]
            )));
        }
        let sector_size = u16::from_le_bytes([data[4], data[5]]) as usize;
        if sector_size != 128 && sector_size != 256 {
            return Err(A8Error::DiskImage(format!(
                "{}: unsupported sector size {}",
                name, sector_size
            )));
        }
        // ヘッダbyte 15 bit0 = 書き込み禁止
        let writable = data[15] & 0x01 == 0;

        let image = DiskImage {
            name: name.to_string(),
            data,
            sector_size,
            writable,
        };
        log::info!(
            "ATR '{}': {} sectors of {} bytes{}",
            name,
            image.sector_count(),
            sector_size,
            if writable { "" } else { " (write-protected)" }
        );
        Ok(image)
    }

    /// 空のATRイメージを作成（フォーマット済み相当）
    pub fn blank(name: &str, sectors: usize, sector_size: usize) -> Result<Self, A8Error> {
        let payload = sectors.min(BOOT_SECTORS) * BOOT_SECTOR_SIZE
            + sectors.saturating_sub(BOOT_SECTORS) * sector_size;
        let paragraphs = payload / 16;
        let mut data = vec![0u8; ATR_HEADER_SIZE + payload];
        data[0..2].copy_from_slice(&ATR_MAGIC);
        data[2] = paragraphs as u8;
        data[3] = (paragraphs >> 8) as u8;
        data[4] = sector_size as u8;
        data[5] = (sector_size >> 8) as u8;
        data[6] = (paragraphs >> 16) as u8;
        Self::from_atr(name, data)
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    /// セクタ数
    pub fn sector_count(&self) -> usize {
        let payload = self.data.len() - ATR_HEADER_SIZE;
        let boot = BOOT_SECTORS * BOOT_SECTOR_SIZE;
        if payload <= boot {
            payload / BOOT_SECTOR_SIZE
        } else {
            BOOT_SECTORS + (payload - boot) / self.sector_size
        }
    }

    /// ヘッダを含むイメージ全体
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// セクタのバイト範囲（範囲外はNone）
    fn sector_range(&self, sector: u16) -> Option<std::ops::Range<usize>> {
        let s = sector as usize;
        if s == 0 {
            return None;
        }
        let (offset, len) = if s <= BOOT_SECTORS {
            (ATR_HEADER_SIZE + (s - 1) * BOOT_SECTOR_SIZE, BOOT_SECTOR_SIZE)
        } else {
            (
                ATR_HEADER_SIZE + BOOT_SECTORS * BOOT_SECTOR_SIZE + (s - 4) * self.sector_size,
                self.sector_size,
            )
        };
        if offset + len > self.data.len() {
            return None;
        }
        Some(offset..offset + len)
    }

    /// セクタの長さ（範囲外はNone）
    pub fn sector_len(&self, sector: u16) -> Option<usize> {
        self.sector_range(sector).map(|r| r.len())
    }

    /// セクタを読む
    pub fn read_sector(&self, sector: u16) -> Option<&[u8]> {
        self.sector_range(sector).map(|r| &self.data[r])
    }

    /// セクタを書く（長さ不一致・範囲外・書き込み禁止ならfalse）
    pub fn write_sector(&mut self, sector: u16, bytes: &[u8]) -> bool {
        if !self.writable {
            return false;
        }
        match self.sector_range(sector) {
            Some(range) if range.len() == bytes.len() => {
                self.data[range].copy_from_slice(bytes);
                true
            }
            _ => false,
        }
    }

    /// データ領域をゼロで埋める
    pub fn format(&mut self) -> bool {
        if !self.writable {
            return false;
        }
        self.data[ATR_HEADER_SIZE..].fill(0);
        true
    }

    /// ステータスフレームの4バイト
    pub fn status_block(&self) -> [u8; 4] {
        let mut flags = if self.sector_size == 256 { 0x30 } else { 0x10 };
        if !self.writable {
            flags |= 0x08;
        }
        [flags, 0xFF, 0xE0, 0x00]
    }
}

/// 受信フェーズ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SioPhase {
    /// コマンドフレーム待ち
    Command,
    /// 書き込み系コマンドのデータフレーム待ち
    Data,
}

/// SIOディスクドライブ群の状態機械
#[derive(Debug, Clone)]
pub struct Sio {
    /// コマンドライン（PIA PBCTL）がアサートされているか
    command_line: bool,
    phase: SioPhase,
    /// 受信中のフレーム
    frame: Vec<u8>,
    /// データフェーズの保留コマンド
    pending_device: usize,
    pending_command: u8,
    pending_sector: u16,
    /// データフレームのペイロード長
    expected: usize,
    /// 応答キュー（バイト, 直前からの遅延サイクル）
    input: Vec<(u8, u32)>,
    /// 次に返す位置
    input_pos: usize,
}

impl Default for Sio {
    fn default() -> Self {
        Self::new()
    }
}

impl Sio {
    pub fn new() -> Self {
        Sio {
            command_line: false,
            phase: SioPhase::Command,
            frame: Vec::with_capacity(260),
            pending_device: 0,
            pending_command: 0,
            pending_sector: 0,
            expected: 0,
            input: Vec::new(),
            input_pos: 0,
        }
    }

    pub fn phase(&self) -> SioPhase {
        self.phase
    }

    /// コマンドラインの状態を更新（アサートで新しいコマンドフレームを開始）
    pub fn set_command_line(&mut self, asserted: bool) {
        if asserted && !self.command_line {
            self.frame.clear();
            self.phase = SioPhase::Command;
        }
        self.command_line = asserted;
    }

    pub fn command_line(&self) -> bool {
        self.command_line
    }

    /// 残りの応答バイト数
    pub fn remaining(&self) -> usize {
        self.input.len() - self.input_pos
    }

    /// 次の応答バイトまでの遅延
    pub fn next_delay(&self) -> Option<u32> {
        self.input.get(self.input_pos).map(|&(_, delay)| delay)
    }

    /// 次の応答バイトを取り出す
    pub fn pop_input(&mut self) -> Option<u8> {
        let (byte, _) = *self.input.get(self.input_pos)?;
        self.input_pos += 1;
        if self.input_pos == self.input.len() {
            self.input.clear();
            self.input_pos = 0;
        }
        Some(byte)
    }

    fn queue(&mut self, byte: u8, delay: u32) {
        self.input.push((byte, delay));
    }

    /// データフレーム（ペイロード + チェックサム）を積む
    fn queue_frame(&mut self, payload: &[u8]) {
        for &b in payload {
            self.queue(b, SIO_BYTE_CYCLES);
        }
        self.queue(sio_checksum(payload), SIO_BYTE_CYCLES);
    }

    fn nak(&mut self) {
        self.queue(SIO_NAK, SIO_ACK_DELAY);
        self.phase = SioPhase::Command;
    }

    /// コンピュータからの1バイト（SEROUT）
    ///
    /// 応答キューを新しく作り直した場合は `true` を返す。
    pub fn put_byte(&mut self, byte: u8, memory: &mut Memory) -> bool {
        match self.phase {
            SioPhase::Command => {
                if !self.command_line {
                    return false;
                }
                self.frame.push(byte);
                if self.frame.len() == 5 {
                    let frame = [self.frame[0], self.frame[1], self.frame[2], self.frame[3], self.frame[4]];
                    self.frame.clear();
                    return self.process_command(frame, memory);
                }
                false
            }
            SioPhase::Data => {
                self.frame.push(byte);
                if self.frame.len() == self.expected + 1 {
                    let frame = std::mem::take(&mut self.frame);
                    self.process_data(&frame, memory);
                    self.frame = frame;
                    self.frame.clear();
                    return true;
                }
                false
            }
        }
    }

    fn process_command(&mut self, frame: [u8; 5], memory: &mut Memory) -> bool {
        let valid = sio_checksum(&frame[..4]) == frame[4];
        trace::trace_sio_command(&frame, valid);

        // ディスクドライブ以外のデバイスには応答しない
        if !(0x31..=0x38).contains(&frame[0]) {
            return false;
        }
        let device = (frame[0] - 0x30) as usize;
        let Some(disk) = memory.disk_for_device(device) else {
            return false;
        };

        // 新しいコマンドで古い応答は破棄
        self.input.clear();
        self.input_pos = 0;

        if !valid {
            self.nak();
            return true;
        }

        let command = frame[1];
        let sector = u16::from_le_bytes([frame[2], frame[3]]);

        match command {
            CMD_READ => match disk.read_sector(sector) {
                Some(data) => {
                    let data = data.to_vec();
                    self.queue(SIO_ACK, SIO_ACK_DELAY);
                    self.queue(SIO_COMPLETE, SIO_COMPLETE_DELAY);
                    self.queue_frame(&data);
                }
                None => self.nak(),
            },
            CMD_STATUS => {
                let status = disk.status_block();
                self.queue(SIO_ACK, SIO_ACK_DELAY);
                self.queue(SIO_COMPLETE, SIO_COMPLETE_DELAY);
                self.queue_frame(&status);
            }
            CMD_WRITE | CMD_PUT | CMD_VERIFY => match disk.sector_len(sector) {
                Some(len) => {
                    self.queue(SIO_ACK, SIO_ACK_DELAY);
                    self.phase = SioPhase::Data;
                    self.pending_device = device;
                    self.pending_command = command;
                    self.pending_sector = sector;
                    self.expected = len;
                }
                None => self.nak(),
            },
            CMD_FORMAT | CMD_FORMAT_ENHANCED => {
                self.queue(SIO_ACK, SIO_ACK_DELAY);
                let sector_size = disk.sector_size();
                if disk.format() {
                    // 不良セクタリスト: $FFFFで終端
                    let mut list = vec![0u8; sector_size];
                    list[0] = 0xFF;
                    list[1] = 0xFF;
                    self.queue(SIO_COMPLETE, SIO_COMPLETE_DELAY);
                    self.queue_frame(&list);
                } else {
                    self.queue(SIO_ERROR, SIO_COMPLETE_DELAY);
                }
            }
            CMD_MOTOR_ON => self.queue(SIO_ACK, SIO_ACK_DELAY),
            _ => self.nak(),
        }

        if let Some(&(first, _)) = self.input.first() {
            trace::trace_sio_response(first, self.input.len());
        }
        true
    }

    fn process_data(&mut self, frame: &[u8], memory: &mut Memory) {
        self.phase = SioPhase::Command;
        let (payload, checksum) = frame.split_at(self.expected);
        let valid = sio_checksum(payload) == checksum[0];
        trace::trace_sio_data(payload.len(), valid);

        self.input.clear();
        self.input_pos = 0;

        if !valid {
            self.nak();
            return;
        }
        let Some(disk) = memory.disk_for_device(self.pending_device) else {
            self.nak();
            return;
        };

        self.queue(SIO_ACK, SIO_ACK_DELAY);
        let ok = match self.pending_command {
            CMD_VERIFY => disk.read_sector(self.pending_sector) == Some(payload),
            _ => disk.write_sector(self.pending_sector, payload),
        };
        self.queue(if ok { SIO_COMPLETE } else { SIO_ERROR }, SIO_COMPLETE_DELAY);
        trace::trace_sio_response(SIO_ACK, self.input.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::OS_ROM_SIZE;

    fn memory_with_disk(sector_size: usize) -> Memory {
        let mut memory = Memory::new(&vec![0; OS_ROM_SIZE], None).unwrap();
        let disk = DiskImage::blank("TEST.ATR", 720, sector_size).unwrap();
        memory.upload_disk(0, "TEST.ATR", disk.bytes().to_vec()).unwrap();
        memory.mount_disk(0, 1).unwrap();
        memory
    }

    fn send_command(sio: &mut Sio, memory: &mut Memory, command: u8, sector: u16) {
        let mut frame = vec![0x31, command, sector as u8, (sector >> 8) as u8];
        frame.push(sio_checksum(&frame));
        sio.set_command_line(true);
        for b in frame {
            sio.put_byte(b, memory);
        }
        sio.set_command_line(false);
    }

    #[test]
    fn test_put_byte_reports_new_response_queue() {
        let mut memory = memory_with_disk(128);
        let mut sio = Sio::new();
        let mut frame = vec![0x31, CMD_STATUS, 0, 0];
        frame.push(sio_checksum(&frame));
        sio.set_command_line(true);
        let accepted: Vec<bool> = frame.iter().map(|&b| sio.put_byte(b, &mut memory)).collect();
        assert_eq!(accepted, vec![false, false, false, false, true]);
        assert_eq!(sio.next_delay(), Some(SIO_ACK_DELAY));

        // 他デバイス宛てはキューに触れない
        sio.set_command_line(false);
        let mut other = vec![0x40, 0x53, 0, 0];
        other.push(sio_checksum(&other));
        sio.set_command_line(true);
        let last = other.iter().map(|&b| sio.put_byte(b, &mut memory)).last();
        assert_eq!(last, Some(false));
        assert_eq!(sio.remaining(), 7);
    }

    fn drain(sio: &mut Sio) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(b) = sio.pop_input() {
            out.push(b);
        }
        out
    }

    #[test]
    fn test_checksum() {
        assert_eq!(sio_checksum(&[0x31, 0x52, 0x01, 0x00]), 0x84);
        // 桁上がりは最下位に戻る
        assert_eq!(sio_checksum(&[0xFF, 0x02]), 0x02);
        assert_eq!(sio_checksum(&[]), 0x00);
    }

    #[test]
    fn test_atr_validation() {
        assert!(DiskImage::from_atr("x", vec![0; 8]).is_err());
        assert!(DiskImage::from_atr("x", vec![0; 32]).is_err());
        let mut data = vec![0u8; 16 + 128];
        data[0] = 0x96;
        data[1] = 0x02;
        data[4] = 0x40;
        assert!(matches!(DiskImage::from_atr("x", data), Err(A8Error::DiskImage(_))));
    }

    #[test]
    fn test_sector_offsets() {
        let disk = DiskImage::blank("DD.ATR", 720, 256).unwrap();
        assert_eq!(disk.sector_count(), 720);
        assert_eq!(disk.sector_range(1), Some(16..144));
        assert_eq!(disk.sector_range(3), Some(272..400));
        assert_eq!(disk.sector_range(4), Some(400..656));
        assert_eq!(disk.sector_range(0), None);
        assert_eq!(disk.sector_range(721), None);
        assert_eq!(disk.status_block(), [0x30, 0xFF, 0xE0, 0x00]);
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let mut memory = memory_with_disk(128);
        let mut sio = Sio::new();

        send_command(&mut sio, &mut memory, CMD_WRITE, 5);
        assert_eq!(drain(&mut sio), vec![SIO_ACK]);
        assert_eq!(sio.phase(), SioPhase::Data);

        let payload: Vec<u8> = (0..128).map(|i| (i * 3) as u8).collect();
        for &b in &payload {
            sio.put_byte(b, &mut memory);
        }
        sio.put_byte(sio_checksum(&payload), &mut memory);
        assert_eq!(drain(&mut sio), vec![SIO_ACK, SIO_COMPLETE]);
        assert_eq!(sio.phase(), SioPhase::Command);

        send_command(&mut sio, &mut memory, CMD_READ, 5);
        let response = drain(&mut sio);
        assert_eq!(response[0], SIO_ACK);
        assert_eq!(response[1], SIO_COMPLETE);
        assert_eq!(&response[2..130], &payload[..]);
        assert_eq!(response[130], sio_checksum(&payload));
    }

    #[test]
    fn test_bad_command_checksum_naks() {
        let mut memory = memory_with_disk(128);
        let mut sio = Sio::new();
        sio.set_command_line(true);
        for b in [0x31, CMD_READ, 0x01, 0x00, 0x00] {
            sio.put_byte(b, &mut memory);
        }
        assert_eq!(drain(&mut sio), vec![SIO_NAK]);
    }

    #[test]
    fn test_out_of_range_sector_naks() {
        let mut memory = memory_with_disk(128);
        let mut sio = Sio::new();
        send_command(&mut sio, &mut memory, CMD_READ, 0);
        assert_eq!(drain(&mut sio), vec![SIO_NAK]);
        send_command(&mut sio, &mut memory, CMD_WRITE, 2000);
        assert_eq!(drain(&mut sio), vec![SIO_NAK]);
        assert_eq!(sio.phase(), SioPhase::Command);
    }

    #[test]
    fn test_bad_data_checksum_does_not_write() {
        let mut memory = memory_with_disk(128);
        let mut sio = Sio::new();
        send_command(&mut sio, &mut memory, CMD_WRITE, 10);
        drain(&mut sio);
        for _ in 0..128 {
            sio.put_byte(0x55, &mut memory);
        }
        sio.put_byte(0x00, &mut memory);
        assert_eq!(drain(&mut sio), vec![SIO_NAK]);
        let disk = memory.disk_for_device(1).unwrap();
        assert!(disk.read_sector(10).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_verify_compares_without_writing() {
        let mut memory = memory_with_disk(128);
        let mut sio = Sio::new();
        send_command(&mut sio, &mut memory, CMD_VERIFY, 4);
        drain(&mut sio);
        let payload = vec![0x11u8; 128];
        for &b in &payload {
            sio.put_byte(b, &mut memory);
        }
        sio.put_byte(sio_checksum(&payload), &mut memory);
        assert_eq!(drain(&mut sio), vec![SIO_ACK, SIO_ERROR]);
        let disk = memory.disk_for_device(1).unwrap();
        assert_eq!(disk.read_sector(4).unwrap()[0], 0);
    }

    #[test]
    fn test_status_and_motor_on() {
        let mut memory = memory_with_disk(128);
        let mut sio = Sio::new();
        send_command(&mut sio, &mut memory, CMD_STATUS, 0);
        let response = drain(&mut sio);
        assert_eq!(&response[..6], &[SIO_ACK, SIO_COMPLETE, 0x10, 0xFF, 0xE0, 0x00]);

        send_command(&mut sio, &mut memory, CMD_MOTOR_ON, 0);
        assert_eq!(drain(&mut sio), vec![SIO_ACK]);
    }

    #[test]
    fn test_no_drive_is_silent() {
        let mut memory = memory_with_disk(128);
        let mut sio = Sio::new();
        let mut frame = vec![0x32, CMD_READ, 1, 0];
        frame.push(sio_checksum(&frame));
        sio.set_command_line(true);
        for b in frame {
            sio.put_byte(b, &mut memory);
        }
        assert_eq!(sio.remaining(), 0);
    }
}
