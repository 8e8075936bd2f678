//! H: 仮想ファイルシステムデバイス
//!
//! OSのCIOエントリ（CIOV $E456 とそのジャンプ先）にPCフックを掛け、
//! IOCBの内容を見て H: 宛ての呼び出しだけを横取りする。ROMは書き換えない。
//!
//! IOCB（$0340 + 16×n）:
//! - +0 ICHID / +1 ICDNO / +2 ICCOM / +3 ICSTA
//! - +4 ICBAL/H（バッファ）/ +6 ICPTL/H（PUT BYTEベクタ-1）/ +8 ICBLL/H（長さ）
//! - +10 ICAX1（モード）/ +11 ICAX2 / +12..14 ICAX3-5（NOTE/POINT位置）
//!
//! 戻りは RTS を模擬し、Y = ステータス、N/Z フラグもYに合わせる。

use std::collections::BTreeMap;
use std::path::Path;

use crate::cpu::Cpu;
use crate::error::A8Error;
use crate::memory::Memory;
use crate::trace;

/// IOCBの先頭アドレス
pub const IOCB_BASE: u16 = 0x0340;
/// IOCBの数
pub const IOCB_COUNT: usize = 8;
/// 1バイト出力フックのアドレス（ICPTL/H + 1）
pub const PUT_BYTE_ENTRY: u16 = 0xD180;
/// レコード終端（ATASCII EOL）
pub const EOL: u8 = 0x9B;

// IOCBのオフセット
const ICHID: u16 = 0;
const ICDNO: u16 = 1;
const ICCOM: u16 = 2;
const ICSTA: u16 = 3;
const ICBAL: u16 = 4;
const ICPTL: u16 = 6;
const ICBLL: u16 = 8;
const ICAX1: u16 = 10;
const ICAX3: u16 = 12;

/// H: で開いたチャンネルのICHID
const HANDLER_ID: u8 = 0x7F;
/// 閉じたチャンネルのICHID
const CLOSED_ID: u8 = 0xFF;

// CIOコマンド
pub mod command {
    pub const OPEN: u8 = 0x03;
    pub const GET_RECORD: u8 = 0x05;
    pub const GET_BYTES: u8 = 0x07;
    pub const PUT_RECORD: u8 = 0x09;
    pub const PUT_BYTES: u8 = 0x0B;
    pub const CLOSE: u8 = 0x0C;
    pub const STATUS: u8 = 0x0D;
    pub const RENAME: u8 = 0x20;
    pub const DELETE: u8 = 0x21;
    pub const LOCK: u8 = 0x23;
    pub const UNLOCK: u8 = 0x24;
    pub const POINT: u8 = 0x25;
    pub const NOTE: u8 = 0x26;
}

// OPENモード（ICAX1）
pub mod mode {
    pub const READ: u8 = 4;
    pub const DIRECTORY: u8 = 6;
    pub const WRITE: u8 = 8;
    pub const APPEND: u8 = 9;
    pub const UPDATE: u8 = 12;
}

/// CIOステータスコード
pub mod status {
    pub const SUCCESS: u8 = 0x01;
    pub const ALREADY_OPEN: u8 = 0x81;
    pub const NO_DEVICE: u8 = 0x82;
    pub const WRITE_ONLY: u8 = 0x83;
    pub const BAD_COMMAND: u8 = 0x84;
    pub const NOT_OPEN: u8 = 0x85;
    pub const READ_ONLY: u8 = 0x87;
    pub const END_OF_FILE: u8 = 0x88;
    pub const TRUNCATED: u8 = 0x89;
    pub const FILE_EXISTS: u8 = 0x97;
    pub const BAD_NAME: u8 = 0xA5;
    pub const LOCKED: u8 = 0xA7;
    pub const NOT_FOUND: u8 = 0xAA;
}

/// フック1回の基本コスト
const CALL_CYCLES: u64 = 200;
/// 1バイトあたりのコスト
const BYTE_CYCLES: u64 = 10;
/// ディレクトリ表示上の総セクタ数
const DIRECTORY_SECTORS: usize = 999;

//--------------------------------------------------
// ホストファイルシステム
//--------------------------------------------------

/// ファイル情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: usize,
    pub locked: bool,
}

/// 変更通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Written(String),
    Deleted(String),
    Renamed { from: String, to: String },
    LockChanged { name: String, locked: bool },
}

/// 購読ID
pub type SubscriptionId = u64;

/// H: の背後にあるファイルシステム
///
/// 名前は大文字の8.3形式（"NAME.EXT"、拡張子なしは "NAME"）。
pub trait HostFs {
    fn list_files(&self, pattern: &str) -> Vec<FileInfo>;
    fn read_file(&self, name: &str) -> Option<Vec<u8>>;
    fn write_file(&mut self, name: &str, data: &[u8]);
    fn delete_file(&mut self, name: &str) -> bool;
    fn rename_file(&mut self, old: &str, new: &str) -> bool;
    fn lock_file(&mut self, name: &str) -> bool;
    fn unlock_file(&mut self, name: &str) -> bool;
    fn get_status(&self, name: &str) -> Option<FileInfo>;
    fn file_exists(&self, name: &str) -> bool {
        self.get_status(name).is_some()
    }
    fn on_change(&mut self, callback: Box<dyn FnMut(&FsEvent)>) -> SubscriptionId;
    fn unsubscribe(&mut self, id: SubscriptionId);
}

#[derive(Debug, Clone, Default)]
struct MemFile {
    data: Vec<u8>,
    locked: bool,
}

/// メモリ上のファイルシステム
#[derive(Default)]
pub struct MemoryFs {
    files: BTreeMap<String, MemFile>,
    subscribers: Vec<(SubscriptionId, Box<dyn FnMut(&FsEvent)>)>,
    next_id: SubscriptionId,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// ディレクトリ内の8.3名のファイルを読み込む
    pub fn from_dir(dir: &Path) -> Result<Self, A8Error> {
        let mut fs = MemoryFs::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_uppercase();
            match normalize_name(&file_name, false) {
                Ok(name) => {
                    let data = std::fs::read(entry.path())?;
                    fs.files.insert(name, MemFile { data, locked: false });
                }
                Err(_) => log::warn!("H: skipping '{}' (not an 8.3 name)", file_name),
            }
        }
        log::info!("H: {} files from {}", fs.files.len(), dir.display());
        Ok(fs)
    }

    fn notify(&mut self, event: FsEvent) {
        for (_, callback) in self.subscribers.iter_mut() {
            callback(&event);
        }
    }

    fn info(name: &str, file: &MemFile) -> FileInfo {
        FileInfo {
            name: name.to_string(),
            size: file.data.len(),
            locked: file.locked,
        }
    }

    fn set_locked(&mut self, name: &str, locked: bool) -> bool {
        match self.files.get_mut(name) {
            Some(file) => {
                file.locked = locked;
                self.notify(FsEvent::LockChanged { name: name.to_string(), locked });
                true
            }
            None => false,
        }
    }
}

impl HostFs for MemoryFs {
    fn list_files(&self, pattern: &str) -> Vec<FileInfo> {
        self.files
            .iter()
            .filter(|(name, _)| wildcard_match(pattern, name))
            .map(|(name, file)| Self::info(name, file))
            .collect()
    }

    fn read_file(&self, name: &str) -> Option<Vec<u8>> {
        self.files.get(name).map(|f| f.data.clone())
    }

    fn write_file(&mut self, name: &str, data: &[u8]) {
        let file = self.files.entry(name.to_string()).or_default();
        file.data = data.to_vec();
        self.notify(FsEvent::Written(name.to_string()));
    }

    fn delete_file(&mut self, name: &str) -> bool {
        if self.files.remove(name).is_some() {
            self.notify(FsEvent::Deleted(name.to_string()));
            true
        } else {
            false
        }
    }

    fn rename_file(&mut self, old: &str, new: &str) -> bool {
        if self.files.contains_key(new) {
            return false;
        }
        match self.files.remove(old) {
            Some(file) => {
                self.files.insert(new.to_string(), file);
                self.notify(FsEvent::Renamed { from: old.to_string(), to: new.to_string() });
                true
            }
            None => false,
        }
    }

    fn lock_file(&mut self, name: &str) -> bool {
        self.set_locked(name, true)
    }

    fn unlock_file(&mut self, name: &str) -> bool {
        self.set_locked(name, false)
    }

    fn get_status(&self, name: &str) -> Option<FileInfo> {
        self.files.get(name).map(|f| Self::info(name, f))
    }

    fn on_change(&mut self, callback: Box<dyn FnMut(&FsEvent)>) -> SubscriptionId {
        self.next_id += 1;
        self.subscribers.push((self.next_id, callback));
        self.next_id
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.retain(|(sub, _)| *sub != id);
    }
}

//--------------------------------------------------
// 名前
//--------------------------------------------------

/// "NAME.EXT" を大文字8.3に正規化。ワイルドカードは `allow_wildcards` のときのみ
pub fn normalize_name(raw: &str, allow_wildcards: bool) -> Result<String, u8> {
    let upper = raw.trim().to_uppercase();
    let (name, ext) = match upper.split_once('.') {
        Some((n, e)) => (n, e),
        None => (upper.as_str(), ""),
    };
    let valid_char = |c: char| c.is_ascii_alphanumeric() || (allow_wildcards && (c == '*' || c == '?'));
    if name.is_empty() || name.len() > 8 || ext.len() > 3 {
        return Err(status::BAD_NAME);
    }
    if !name.chars().all(valid_char) || !ext.chars().all(valid_char) {
        return Err(status::BAD_NAME);
    }
    if ext.is_empty() {
        Ok(name.to_string())
    } else {
        Ok(format!("{}.{}", name, ext))
    }
}

/// `*` と `?` のワイルドカード照合（拡張子のないパターンは任意の拡張子に一致）
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let (pat_name, pat_ext) = pattern.split_once('.').unwrap_or((pattern, "*"));
    let (name_part, ext_part) = name.split_once('.').unwrap_or((name, ""));
    glob(pat_name.as_bytes(), name_part.as_bytes()) && glob(pat_ext.as_bytes(), ext_part.as_bytes())
}

fn glob(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|i| glob(rest, &text[i..])),
        Some((b'?', rest)) => !text.is_empty() && glob(rest, &text[1..]),
        Some((&c, rest)) => text.first() == Some(&c) && glob(rest, &text[1..]),
    }
}

/// "H:" / "Hn:" を外してユニット番号と残りを返す
fn split_device(target: &str) -> Result<(u8, &str), u8> {
    let bytes = target.as_bytes();
    match bytes {
        [b'H', b':', ..] => Ok((1, &target[2..])),
        [b'H', d @ b'1'..=b'9', b':', ..] => Ok((d - b'0', &target[3..])),
        _ => Err(status::NO_DEVICE),
    }
}

//--------------------------------------------------
// チャンネル
//--------------------------------------------------

/// チャンネルの中身（同時に持つのは1種類だけ）
#[derive(Debug, Clone)]
enum ChannelData {
    /// 読み出し専用の内容
    Read(Vec<u8>),
    /// 書き込み / 追記 / 更新用のバッファ（CLOSEで書き戻す）
    Write(Vec<u8>),
    /// ディレクトリ一覧（EOL区切り）
    Directory(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Channel {
    filename: String,
    mode: u8,
    position: usize,
    data: ChannelData,
}

impl Channel {
    fn readable(&self) -> bool {
        self.mode & mode::READ != 0
    }

    fn writable(&self) -> bool {
        self.mode & mode::WRITE != 0
    }

    fn next_byte(&mut self) -> Option<u8> {
        let buf = match &self.data {
            ChannelData::Read(buf) | ChannelData::Write(buf) | ChannelData::Directory(buf) => buf,
        };
        let byte = *buf.get(self.position)?;
        self.position += 1;
        Some(byte)
    }

    fn put(&mut self, byte: u8) {
        if let ChannelData::Write(buf) = &mut self.data {
            if self.position < buf.len() {
                buf[self.position] = byte;
            } else {
                buf.push(byte);
            }
            self.position += 1;
        }
    }

    fn len(&self) -> usize {
        match &self.data {
            ChannelData::Read(buf) | ChannelData::Write(buf) | ChannelData::Directory(buf) => buf.len(),
        }
    }
}

/// 1回の呼び出しの結果
struct Reply {
    status: u8,
    /// 転送したバイト数（サイクルコスト用）
    bytes: usize,
    /// Aレジスタへ返す値（1バイト転送）
    accumulator: Option<u8>,
}

impl Reply {
    fn status(status: u8) -> Self {
        Reply { status, bytes: 0, accumulator: None }
    }

    fn transferred(status: u8, bytes: usize) -> Self {
        Reply { status, bytes, accumulator: None }
    }
}

/// H: デバイス
pub struct HDevice {
    fs: Box<dyn HostFs>,
    channels: [Option<Channel>; IOCB_COUNT],
}

impl HDevice {
    pub fn new(fs: Box<dyn HostFs>) -> Self {
        HDevice {
            fs,
            channels: Default::default(),
        }
    }

    pub fn fs(&self) -> &dyn HostFs {
        self.fs.as_ref()
    }

    pub fn fs_mut(&mut self) -> &mut dyn HostFs {
        self.fs.as_mut()
    }

    /// 全チャンネルを閉じる（書き戻しはしない）
    pub fn close_all(&mut self) {
        self.channels = Default::default();
    }

    pub fn is_open(&self, channel: usize) -> bool {
        self.channels.get(channel).map_or(false, |c| c.is_some())
    }

    /// CIOVフック。H: 宛てなら処理してtrue
    pub fn call(&mut self, cpu: &mut Cpu, memory: &mut Memory) -> bool {
        let x = cpu.regs.x;
        if x & 0x0F != 0 || x as usize >= IOCB_COUNT * 16 {
            return false;
        }
        let channel = (x >> 4) as usize;
        let iocb = IOCB_BASE + x as u16;
        let cmd = memory.peek(iocb + ICCOM);
        let ours = self.channels[channel].is_some();

        let reply = match cmd {
            command::OPEN => {
                if !Self::names_h_device(memory, iocb) {
                    return false;
                }
                self.open(memory, iocb, channel)
            }
            _ if ours => self.dispatch(cpu, memory, iocb, channel, cmd),
            command::STATUS | command::RENAME..=command::UNLOCK => {
                if !Self::names_h_device(memory, iocb) {
                    return false;
                }
                self.filename_command(memory, iocb, cmd)
            }
            _ => return false,
        };

        trace::trace_cio(channel, cmd, reply.status);
        Self::finish(cpu, memory, iocb, reply);
        true
    }

    /// PUT BYTEベクタのフック（A = バイト、X = IOCB×16）
    pub fn put_byte(&mut self, cpu: &mut Cpu, memory: &mut Memory) -> bool {
        let x = cpu.regs.x;
        let channel = (x >> 4) as usize & (IOCB_COUNT - 1);
        let iocb = IOCB_BASE + (channel as u16) * 16;
        let value = cpu.regs.a;
        let reply = match self.channels[channel].as_mut() {
            None => Reply::status(status::NOT_OPEN),
            Some(ch) if !ch.writable() => Reply::status(status::READ_ONLY),
            Some(ch) => {
                ch.put(value);
                Reply::transferred(status::SUCCESS, 1)
            }
        };
        Self::finish(cpu, memory, iocb, reply);
        true
    }

    /// ステータスを書き、RTSを模擬する
    fn finish(cpu: &mut Cpu, memory: &mut Memory, iocb: u16, reply: Reply) {
        memory.poke(iocb + ICSTA, reply.status);
        if let Some(value) = reply.accumulator {
            cpu.regs.a = value;
        }
        cpu.regs.y = reply.status;
        cpu.regs.update_zero_negative_flags(reply.status);
        cpu.simulate_rts(memory);
        cpu.total_cycles += CALL_CYCLES + reply.bytes as u64 * BYTE_CYCLES;
    }

    fn names_h_device(memory: &Memory, iocb: u16) -> bool {
        let addr = memory.peek_word(iocb + ICBAL);
        memory.peek(addr) == b'H'
    }

    /// ICBALのファイル名（EOL / NUL / 空白まで）
    fn read_filename(memory: &Memory, iocb: u16) -> String {
        let addr = memory.peek_word(iocb + ICBAL);
        (0..64u16)
            .map(|i| memory.peek(addr.wrapping_add(i)))
            .take_while(|&b| b != EOL && b != 0 && b != b' ')
            .map(|b| (b & 0x7F) as char)
            .collect()
    }

    fn buffer_length(memory: &Memory, iocb: u16) -> usize {
        memory.peek_word(iocb + ICBLL) as usize
    }

    //--------------------------------------------------
    // OPEN / CLOSE
    //--------------------------------------------------

    fn open(&mut self, memory: &mut Memory, iocb: u16, channel: usize) -> Reply {
        if memory.peek(iocb + ICHID) != CLOSED_ID {
            return Reply::status(status::ALREADY_OPEN);
        }
        // ウォームリセットでICHIDだけ$FFに戻されたチャンネルは破棄
        if let Some(stale) = self.channels[channel].take() {
            log::debug!("H: dropping stale channel {} ('{}')", channel, stale.filename);
        }
        let target = Self::read_filename(memory, iocb);
        let (unit, rest) = match split_device(&target) {
            Ok(parts) => parts,
            Err(code) => return Reply::status(code),
        };
        let open_mode = memory.peek(iocb + ICAX1) & 0x0F;

        let opened = match open_mode {
            mode::DIRECTORY => self.open_directory(rest),
            mode::READ | mode::WRITE | mode::APPEND | mode::UPDATE => self.open_file(rest, open_mode),
            _ => Err(status::BAD_COMMAND),
        };
        let ch = match opened {
            Ok(ch) => ch,
            Err(code) => return Reply::status(code),
        };

        log::debug!("H{}: open '{}' mode {}", unit, ch.filename, open_mode);
        self.channels[channel] = Some(ch);
        memory.poke(iocb + ICHID, HANDLER_ID);
        memory.poke(iocb + ICDNO, unit);
        let vector = PUT_BYTE_ENTRY - 1;
        memory.poke(iocb + ICPTL, vector as u8);
        memory.poke(iocb + ICPTL + 1, (vector >> 8) as u8);
        Reply::status(status::SUCCESS)
    }

    fn open_file(&mut self, raw: &str, open_mode: u8) -> Result<Channel, u8> {
        let pattern = normalize_name(raw, open_mode == mode::READ)?;
        let filename = if pattern.contains(|c| c == '*' || c == '?') {
            self.fs.list_files(&pattern).first().map(|f| f.name.clone()).ok_or(status::NOT_FOUND)?
        } else {
            pattern
        };
        let info = self.fs.get_status(&filename);

        let (data, position) = match open_mode {
            mode::READ => {
                let content = self.fs.read_file(&filename).ok_or(status::NOT_FOUND)?;
                (ChannelData::Read(content), 0)
            }
            mode::WRITE => {
                if info.map_or(false, |i| i.locked) {
                    return Err(status::LOCKED);
                }
                (ChannelData::Write(Vec::new()), 0)
            }
            _ => {
                let info = info.ok_or(status::NOT_FOUND)?;
                if info.locked {
                    return Err(status::LOCKED);
                }
                let content = self.fs.read_file(&filename).ok_or(status::NOT_FOUND)?;
                let position = if open_mode == mode::APPEND { content.len() } else { 0 };
                (ChannelData::Write(content), position)
            }
        };
        Ok(Channel { filename, mode: open_mode, position, data })
    }

    fn open_directory(&mut self, raw: &str) -> Result<Channel, u8> {
        let pattern = if raw.is_empty() { "*.*".to_string() } else { normalize_name(raw, true)? };
        let files = self.fs.list_files(&pattern);

        let mut listing = Vec::new();
        let mut used = 0;
        for file in &files {
            let (name, ext) = file.name.split_once('.').unwrap_or((file.name.as_str(), ""));
            let sectors = ((file.size + 124) / 125).min(DIRECTORY_SECTORS);
            used += sectors;
            let lock = if file.locked { '*' } else { ' ' };
            listing.extend(format!("{} {:<8} {:<3} {:03}", lock, name, ext, sectors).bytes());
            listing.push(EOL);
        }
        let free = DIRECTORY_SECTORS.saturating_sub(used);
        listing.extend(format!("{:03} FREE SECTORS", free).bytes());
        listing.push(EOL);

        Ok(Channel {
            filename: pattern,
            mode: mode::DIRECTORY,
            position: 0,
            data: ChannelData::Directory(listing),
        })
    }

    fn close(&mut self, memory: &mut Memory, iocb: u16, channel: usize) -> Reply {
        if let Some(ch) = self.channels[channel].take() {
            if let ChannelData::Write(buf) = &ch.data {
                self.fs.write_file(&ch.filename, buf);
                log::debug!("H: wrote '{}' ({} bytes)", ch.filename, buf.len());
            }
        }
        memory.poke(iocb + ICHID, CLOSED_ID);
        Reply::status(status::SUCCESS)
    }

    //--------------------------------------------------
    // 開いたチャンネルへのコマンド
    //--------------------------------------------------

    fn dispatch(&mut self, cpu: &Cpu, memory: &mut Memory, iocb: u16, channel: usize, cmd: u8) -> Reply {
        match cmd {
            command::CLOSE => self.close(memory, iocb, channel),
            command::GET_RECORD => self.get_record(memory, iocb, channel),
            command::GET_BYTES => self.get_bytes(memory, iocb, channel),
            command::PUT_RECORD => self.put_data(cpu, memory, iocb, channel, true),
            command::PUT_BYTES => self.put_data(cpu, memory, iocb, channel, false),
            command::STATUS => Reply::status(status::SUCCESS),
            command::POINT => self.point(memory, iocb, channel),
            command::NOTE => self.note(memory, iocb, channel),
            command::RENAME..=command::UNLOCK => self.filename_command(memory, iocb, cmd),
            _ => Reply::status(status::BAD_COMMAND),
        }
    }

    fn readable_channel(&mut self, channel: usize) -> Result<&mut Channel, u8> {
        let ch = self.channels[channel].as_mut().ok_or(status::NOT_OPEN)?;
        if !ch.readable() {
            return Err(status::WRITE_ONLY);
        }
        Ok(ch)
    }

    /// GET RECORD: EOLまたはバッファ満杯まで
    fn get_record(&mut self, memory: &mut Memory, iocb: u16, channel: usize) -> Reply {
        let max = Self::buffer_length(memory, iocb);
        let ch = match self.readable_channel(channel) {
            Ok(ch) => ch,
            Err(code) => return Reply::status(code),
        };

        let mut record = Vec::new();
        let mut code = status::SUCCESS;
        loop {
            match ch.next_byte() {
                None => {
                    if record.is_empty() {
                        code = status::END_OF_FILE;
                    } else if record.len() < max {
                        // 終端のない最終レコード
                        record.push(EOL);
                    }
                    break;
                }
                Some(byte) => {
                    if record.len() >= max {
                        // 入りきらない残りはEOLまで読み捨てる
                        code = status::TRUNCATED;
                        if byte == EOL {
                            break;
                        }
                        continue;
                    }
                    record.push(byte);
                    if byte == EOL {
                        break;
                    }
                }
            }
        }

        Self::store_buffer(memory, iocb, &record);
        Reply::transferred(code, record.len())
    }

    /// GET BYTES: 指定長の生データ（長さ0ならAに1バイト）
    fn get_bytes(&mut self, memory: &mut Memory, iocb: u16, channel: usize) -> Reply {
        let count = Self::buffer_length(memory, iocb);
        let ch = match self.readable_channel(channel) {
            Ok(ch) => ch,
            Err(code) => return Reply::status(code),
        };

        if count == 0 {
            return match ch.next_byte() {
                Some(byte) => Reply { status: status::SUCCESS, bytes: 1, accumulator: Some(byte) },
                None => Reply::status(status::END_OF_FILE),
            };
        }

        let data: Vec<u8> = std::iter::from_fn(|| ch.next_byte()).take(count).collect();
        let code = if data.len() < count { status::END_OF_FILE } else { status::SUCCESS };
        Self::store_buffer(memory, iocb, &data);
        Reply::transferred(code, data.len())
    }

    /// 受信データをバッファへ書き、ICBLLを実際の長さにする
    fn store_buffer(memory: &mut Memory, iocb: u16, data: &[u8]) {
        let addr = memory.peek_word(iocb + ICBAL);
        for (i, &byte) in data.iter().enumerate() {
            memory.poke(addr.wrapping_add(i as u16), byte);
        }
        memory.poke(iocb + ICBLL, data.len() as u8);
        memory.poke(iocb + ICBLL + 1, (data.len() >> 8) as u8);
    }

    /// PUT RECORD / PUT BYTES（長さ0ならAの1バイト）
    fn put_data(&mut self, cpu: &Cpu, memory: &mut Memory, iocb: u16, channel: usize, record: bool) -> Reply {
        let count = Self::buffer_length(memory, iocb);
        let addr = memory.peek_word(iocb + ICBAL);
        let ch = match self.channels[channel].as_mut() {
            Some(ch) => ch,
            None => return Reply::status(status::NOT_OPEN),
        };
        if !ch.writable() {
            return Reply::status(status::READ_ONLY);
        }

        if count == 0 {
            ch.put(cpu.regs.a);
            return Reply::transferred(status::SUCCESS, 1);
        }

        let mut written = 0;
        let mut terminated = false;
        for i in 0..count {
            let byte = memory.peek(addr.wrapping_add(i as u16));
            ch.put(byte);
            written += 1;
            if record && byte == EOL {
                terminated = true;
                break;
            }
        }
        if record && !terminated {
            ch.put(EOL);
            written += 1;
        }
        Reply::transferred(status::SUCCESS, written)
    }

    fn point(&mut self, memory: &Memory, iocb: u16, channel: usize) -> Reply {
        let offset = memory.peek(iocb + ICAX3) as usize
            | (memory.peek(iocb + ICAX3 + 1) as usize) << 8
            | (memory.peek(iocb + ICAX3 + 2) as usize) << 16;
        match self.channels[channel].as_mut() {
            Some(ch) if ch.mode != mode::DIRECTORY => {
                if offset > ch.len() {
                    return Reply::status(status::END_OF_FILE);
                }
                ch.position = offset;
                Reply::status(status::SUCCESS)
            }
            Some(_) => Reply::status(status::BAD_COMMAND),
            None => Reply::status(status::NOT_OPEN),
        }
    }

    fn note(&mut self, memory: &mut Memory, iocb: u16, channel: usize) -> Reply {
        match self.channels[channel].as_ref() {
            Some(ch) if ch.mode != mode::DIRECTORY => {
                let pos = ch.position;
                memory.poke(iocb + ICAX3, pos as u8);
                memory.poke(iocb + ICAX3 + 1, (pos >> 8) as u8);
                memory.poke(iocb + ICAX3 + 2, (pos >> 16) as u8);
                Reply::status(status::SUCCESS)
            }
            Some(_) => Reply::status(status::BAD_COMMAND),
            None => Reply::status(status::NOT_OPEN),
        }
    }

    //--------------------------------------------------
    // ファイル名で指定するコマンド（XIO / 閉じたチャンネルのSTATUS）
    //--------------------------------------------------

    fn filename_command(&mut self, memory: &Memory, iocb: u16, cmd: u8) -> Reply {
        let target = Self::read_filename(memory, iocb);
        let rest = match split_device(&target) {
            Ok((_, rest)) => rest,
            Err(code) => return Reply::status(code),
        };
        let code = match cmd {
            command::RENAME => self.rename(rest),
            command::STATUS => match normalize_name(rest, false) {
                Ok(name) if self.fs.file_exists(&name) => status::SUCCESS,
                Ok(_) => status::NOT_FOUND,
                Err(code) => code,
            },
            command::DELETE | command::LOCK | command::UNLOCK => self.apply_to_matches(rest, cmd),
            _ => status::BAD_COMMAND,
        };
        Reply::status(code)
    }

    /// "OLD.EXT,NEW.EXT"
    fn rename(&mut self, rest: &str) -> u8 {
        let Some((old, new)) = rest.split_once(',') else {
            return status::BAD_NAME;
        };
        let new = new.strip_prefix("H:").unwrap_or(new);
        let (old, new) = match (normalize_name(old, false), normalize_name(new, false)) {
            (Ok(o), Ok(n)) => (o, n),
            _ => return status::BAD_NAME,
        };
        match self.fs.get_status(&old) {
            None => status::NOT_FOUND,
            Some(info) if info.locked => status::LOCKED,
            Some(_) if self.fs.file_exists(&new) => status::FILE_EXISTS,
            Some(_) => {
                if self.fs.rename_file(&old, &new) {
                    status::SUCCESS
                } else {
                    status::FILE_EXISTS
                }
            }
        }
    }

    /// DELETE / LOCK / UNLOCK（ワイルドカード可）
    fn apply_to_matches(&mut self, rest: &str, cmd: u8) -> u8 {
        let pattern = match normalize_name(rest, true) {
            Ok(p) => p,
            Err(code) => return code,
        };
        let files = self.fs.list_files(&pattern);
        if files.is_empty() {
            return status::NOT_FOUND;
        }
        for file in files {
            match cmd {
                command::DELETE => {
                    if file.locked {
                        return status::LOCKED;
                    }
                    self.fs.delete_file(&file.name);
                }
                command::LOCK => {
                    self.fs.lock_file(&file.name);
                }
                _ => {
                    self.fs.unlock_file(&file.name);
                }
            }
        }
        status::SUCCESS
    }
}
