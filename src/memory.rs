//! Atari 800XL メモリサブシステム
//!
//! 64KBのアドレス空間とバンク切り替えを実装。
//! `live` がCPUから見える内容、`shadow` がROMの裏に隠れたRAMの内容。
//! アドレスごとの分類（RAM / ROM / I/O）はアクセステーブルで持つ。

use crate::cpu::MemoryBus;
use crate::disk::DiskImage;
use crate::error::{A8Error, RomKind};

/// OS ROMのサイズ
pub const OS_ROM_SIZE: usize = 0x4000;
/// BASIC ROMのサイズ
pub const BASIC_ROM_SIZE: usize = 0x2000;

/// ディスクスロットが空であることを示す値
pub const NO_IMAGE: usize = usize::MAX;
/// ホストスロット／デバイススロットの数
pub const SLOT_COUNT: usize = 8;

/// I/Oレジスタブロックを持つチップ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoChip {
    /// $D000-$D0FF
    Gtia,
    /// $D200-$D2FF
    Pokey,
    /// $D300-$D3FF
    Pia,
    /// $D400-$D4FF
    Antic,
}

/// アドレスの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Ram,
    Rom,
    Io(IoChip),
}

// ROMの配置
const OS_LOW_START: usize = 0xC000; // ROM $0000-$0FFF
const SELFTEST_START: usize = 0x5000; // ROM $1000-$17FF
const SELFTEST_LEN: usize = 0x0800;
const OS_HIGH_START: usize = 0xD800; // ROM $1800-$3FFF（浮動小数点 + OS本体）
const BASIC_START: usize = 0xA000;

/// メモリシステム
pub struct Memory {
    /// CPUから見える64KB
    live: Vec<u8>,
    /// ROMに隠れているRAMの内容
    shadow: Vec<u8>,
    /// アドレスごとの分類
    access: Vec<Access>,
    /// OS ROM (16KB)
    os_rom: Vec<u8>,
    /// BASIC ROM (8KB)
    basic_rom: Option<Vec<u8>>,
    /// 現在のマッピング状態
    os_mapped: bool,
    basic_mapped: bool,
    selftest_mapped: bool,
    /// ディスクイメージ一覧
    disks: Vec<DiskImage>,
    /// アップロード先スロット → イメージ番号
    host_slots: [usize; SLOT_COUNT],
    /// デバイス番号（D1:～D8:） → イメージ番号
    device_slots: [usize; SLOT_COUNT],
}

/// 領域をROMで覆う（RAMの内容はshadowへ退避）
fn expose(live: &mut [u8], shadow: &mut [u8], access: &mut [Access], start: usize, image: &[u8]) {
    let end = start + image.len();
    shadow[start..end].copy_from_slice(&live[start..end]);
    live[start..end].copy_from_slice(image);
    access[start..end].fill(Access::Rom);
}

/// 領域のROMを外す（shadowからRAMを復元）
fn hide(live: &mut [u8], shadow: &[u8], access: &mut [Access], start: usize, len: usize) {
    let end = start + len;
    live[start..end].copy_from_slice(&shadow[start..end]);
    access[start..end].fill(Access::Ram);
}

impl Memory {
    /// ROMを読み込んでメモリシステムを作成
    ///
    /// OS ROMは16384バイト、BASIC ROMは8192バイトちょうどでなければならない。
    pub fn new(os_rom: &[u8], basic_rom: Option<&[u8]>) -> Result<Self, A8Error> {
        let mut memory = Memory {
            live: vec![0; 0x10000],
            shadow: vec![0; 0x10000],
            access: vec![Access::Ram; 0x10000],
            os_rom: Vec::new(),
            basic_rom: None,
            os_mapped: false,
            basic_mapped: false,
            selftest_mapped: false,
            disks: Vec::new(),
            host_slots: [NO_IMAGE; SLOT_COUNT],
            device_slots: [NO_IMAGE; SLOT_COUNT],
        };
        memory.load_os_rom(os_rom)?;
        if let Some(basic) = basic_rom {
            memory.load_basic_rom(basic)?;
        }
        memory.reset();
        Ok(memory)
    }

    /// OS ROMを設定
    pub fn load_os_rom(&mut self, data: &[u8]) -> Result<(), A8Error> {
        if data.len() != OS_ROM_SIZE {
            return Err(A8Error::RomSize {
                kind: RomKind::Os,
                expected: OS_ROM_SIZE,
                actual: data.len(),
            });
        }
        self.os_rom = data.to_vec();
        log::info!("OS ROM loaded ({} bytes)", data.len());
        Ok(())
    }

    /// BASIC ROMを設定
    pub fn load_basic_rom(&mut self, data: &[u8]) -> Result<(), A8Error> {
        if data.len() != BASIC_ROM_SIZE {
            return Err(A8Error::RomSize {
                kind: RomKind::Basic,
                expected: BASIC_ROM_SIZE,
                actual: data.len(),
            });
        }
        self.basic_rom = Some(data.to_vec());
        log::info!("BASIC ROM loaded ({} bytes)", data.len());
        Ok(())
    }

    /// 電源投入状態に戻す（ディスクイメージは保持）
    pub fn reset(&mut self) {
        self.live.fill(0);
        self.shadow.fill(0);
        self.access.fill(Access::Ram);
        self.os_mapped = false;
        self.basic_mapped = false;
        self.selftest_mapped = false;
        // PIAのDDRは全入力 = PORTBは$FFとして読める
        self.apply_portb(0xFF);
    }

    /// 範囲をROMに分類
    pub fn set_rom(&mut self, start: u16, end: u16) {
        self.access[start as usize..=end as usize].fill(Access::Rom);
    }

    /// 範囲をRAMに分類
    pub fn set_ram(&mut self, start: u16, end: u16) {
        self.access[start as usize..=end as usize].fill(Access::Ram);
    }

    /// 1アドレスをI/Oレジスタに分類
    pub fn set_io(&mut self, address: u16, chip: IoChip) {
        self.access[address as usize] = Access::Io(chip);
    }

    /// アドレスの分類を取得
    #[inline]
    pub fn access(&self, address: u16) -> Access {
        self.access[address as usize]
    }

    /// I/O領域を配置する
    fn install_io(&mut self) {
        for (page, chip) in [
            (0xD000u16, Some(IoChip::Gtia)),
            (0xD100, None),
            (0xD200, Some(IoChip::Pokey)),
            (0xD300, Some(IoChip::Pia)),
            (0xD400, Some(IoChip::Antic)),
            (0xD500, None),
            (0xD600, None),
            (0xD700, None),
        ] {
            match chip {
                Some(chip) => {
                    for addr in page..page + 0x100 {
                        self.set_io(addr, chip);
                    }
                }
                None => {
                    // 未接続のバス: $FFが読める
                    self.set_rom(page, page + 0xFF);
                    self.live[page as usize..page as usize + 0x100].fill(0xFF);
                }
            }
        }
    }

    /// PORTBの値に応じてバンクを切り替える
    ///
    /// bit0=1: OS ROM有効 / bit1=0: BASIC有効 / bit7=0: セルフテスト有効（OS有効時のみ）
    pub fn apply_portb(&mut self, value: u8) {
        let want_os = value & 0x01 != 0;
        let want_basic = value & 0x02 == 0 && self.basic_rom.is_some();
        let want_selftest = want_os && value & 0x80 == 0;

        if want_os != self.os_mapped {
            if want_os {
                expose(&mut self.live, &mut self.shadow, &mut self.access, OS_LOW_START, &self.os_rom[..0x1000]);
                expose(&mut self.live, &mut self.shadow, &mut self.access, OS_HIGH_START, &self.os_rom[0x1800..]);
            } else {
                hide(&mut self.live, &self.shadow, &mut self.access, OS_LOW_START, 0x1000);
                hide(&mut self.live, &self.shadow, &mut self.access, OS_HIGH_START, 0x2800);
            }
            self.os_mapped = want_os;
        }

        if want_selftest != self.selftest_mapped {
            if want_selftest {
                expose(
                    &mut self.live,
                    &mut self.shadow,
                    &mut self.access,
                    SELFTEST_START,
                    &self.os_rom[0x1000..0x1000 + SELFTEST_LEN],
                );
            } else {
                hide(&mut self.live, &self.shadow, &mut self.access, SELFTEST_START, SELFTEST_LEN);
            }
            self.selftest_mapped = want_selftest;
        }

        if want_basic != self.basic_mapped {
            match (&self.basic_rom, want_basic) {
                (Some(rom), true) => {
                    expose(&mut self.live, &mut self.shadow, &mut self.access, BASIC_START, rom);
                }
                _ => hide(&mut self.live, &self.shadow, &mut self.access, BASIC_START, BASIC_ROM_SIZE),
            }
            self.basic_mapped = want_basic;
        }

        // マッピング後にI/Oを再配置
        self.install_io();
    }

    /// BASIC ROMが見えているか（TRIG3に反映される）
    pub fn basic_mapped(&self) -> bool {
        self.basic_mapped
    }

    pub fn os_mapped(&self) -> bool {
        self.os_mapped
    }

    pub fn selftest_mapped(&self) -> bool {
        self.selftest_mapped
    }

    /// CPUから見える64KB（ANTICのDMAはここを直接読む）
    #[inline]
    pub fn live(&self) -> &[u8] {
        &self.live
    }

    /// I/Oを経由しない読み出し
    #[inline]
    pub fn peek(&self, address: u16) -> u8 {
        self.live[address as usize]
    }

    /// ワード読み出し（リトルエンディアン）
    pub fn peek_word(&self, address: u16) -> u16 {
        self.peek(address) as u16 | (self.peek(address.wrapping_add(1)) as u16) << 8
    }

    /// RAMへの書き込み（ROM / I/Oは無視）
    #[inline]
    pub fn poke(&mut self, address: u16, value: u8) {
        if self.access[address as usize] == Access::Ram {
            self.live[address as usize] = value;
        }
    }

    //--------------------------------------------------
    // ディスクイメージ管理
    //--------------------------------------------------

    /// ホストスロットへイメージを登録（既存ならば置き換え）
    pub fn upload_disk(&mut self, slot: usize, name: &str, data: Vec<u8>) -> Result<usize, A8Error> {
        if slot >= SLOT_COUNT {
            return Err(A8Error::InvalidSlot(slot));
        }
        let image = DiskImage::from_atr(name, data)?;
        let index = match self.host_slots[slot] {
            NO_IMAGE => {
                self.disks.push(image);
                self.disks.len() - 1
            }
            existing => {
                self.disks[existing] = image;
                existing
            }
        };
        self.host_slots[slot] = index;
        log::info!("Disk image '{}' stored in slot {}", name, slot);
        Ok(index)
    }

    /// スロットのイメージをデバイス（1～8）にマウント
    pub fn mount_disk(&mut self, slot: usize, device: usize) -> Result<(), A8Error> {
        if slot >= SLOT_COUNT {
            return Err(A8Error::InvalidSlot(slot));
        }
        if device == 0 || device > SLOT_COUNT {
            return Err(A8Error::InvalidSlot(device));
        }
        let index = self.host_slots[slot];
        if index == NO_IMAGE {
            return Err(A8Error::MissingResource("disk image"));
        }
        self.device_slots[device - 1] = index;
        log::info!("D{}: <- '{}'", device, self.disks[index].name);
        Ok(())
    }

    /// デバイスのマウントを解除
    pub fn unmount_disk(&mut self, device: usize) {
        if (1..=SLOT_COUNT).contains(&device) {
            self.device_slots[device - 1] = NO_IMAGE;
        }
    }

    /// デバイスにマウントされたイメージ
    pub fn disk_for_device(&mut self, device: usize) -> Option<&mut DiskImage> {
        if !(1..=SLOT_COUNT).contains(&device) {
            return None;
        }
        match self.device_slots[device - 1] {
            NO_IMAGE => None,
            index => self.disks.get_mut(index),
        }
    }

    /// スロットのイメージのバイト列（ホスト側での保存用）
    pub fn export_disk(&self, slot: usize) -> Option<&[u8]> {
        match self.host_slots.get(slot) {
            Some(&NO_IMAGE) | None => None,
            Some(&index) => self.disks.get(index).map(|d| d.bytes()),
        }
    }

    /// ホストスロットのイメージ番号
    pub fn host_slot(&self, slot: usize) -> usize {
        self.host_slots.get(slot).copied().unwrap_or(NO_IMAGE)
    }

    /// デバイススロットのイメージ番号
    pub fn device_slot(&self, device: usize) -> usize {
        if (1..=SLOT_COUNT).contains(&device) {
            self.device_slots[device - 1]
        } else {
            NO_IMAGE
        }
    }
}

/// 生のメモリアクセス（I/Oディスパッチなし）
impl MemoryBus for Memory {
    fn read(&mut self, address: u16) -> u8 {
        self.peek(address)
    }

    fn write(&mut self, address: u16, value: u8) {
        self.poke(address, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_os() -> Vec<u8> {
        (0..OS_ROM_SIZE).map(|i| (i >> 8) as u8 ^ 0xA5).collect()
    }

    fn test_basic() -> Vec<u8> {
        vec![0xBA; BASIC_ROM_SIZE]
    }

    fn memory() -> Memory {
        Memory::new(&test_os(), Some(&test_basic())).unwrap()
    }

    #[test]
    fn test_rom_size_is_checked() {
        assert!(matches!(
            Memory::new(&[0; 100], None),
            Err(A8Error::RomSize { kind: RomKind::Os, expected: 16384, actual: 100 })
        ));
        assert!(matches!(
            Memory::new(&test_os(), Some(&[0; 8000])),
            Err(A8Error::RomSize { kind: RomKind::Basic, .. })
        ));
    }

    #[test]
    fn test_power_on_mapping() {
        let mem = memory();
        assert!(mem.os_mapped());
        assert!(!mem.basic_mapped());
        assert!(!mem.selftest_mapped());
        assert_eq!(mem.access(0xE000), Access::Rom);
        assert_eq!(mem.access(0xA000), Access::Ram);
        assert_eq!(mem.access(0xD40B), Access::Io(IoChip::Antic));
        assert_eq!(mem.access(0xD01F), Access::Io(IoChip::Gtia));
        assert_eq!(mem.peek(0xD100), 0xFF);
        assert_eq!(mem.peek(0xD600), 0xFF);
    }

    #[test]
    fn test_os_rom_layout() {
        let os = test_os();
        let mut mem = memory();
        mem.apply_portb(0x7F); // セルフテスト有効
        assert_eq!(mem.peek(0xC000), os[0x0000]);
        assert_eq!(mem.peek(0x5000), os[0x1000]);
        assert_eq!(mem.peek(0xD800), os[0x1800]);
        assert_eq!(mem.peek(0xE000), os[0x2000]);
        assert_eq!(mem.peek(0xFFFF), os[0x3FFF]);
    }

    #[test]
    fn test_rom_write_ignored() {
        let mut mem = memory();
        let before = mem.peek(0xE000);
        mem.poke(0xE000, before.wrapping_add(1));
        assert_eq!(mem.peek(0xE000), before);
    }

    /// どのROM領域も、他の領域の状態によらず有効→無効でRAMが戻る
    #[test]
    fn test_bank_switch_round_trip() {
        // (テストアドレス, PORTBのビット, ビットが1で有効か)
        let cases: [(u16, u8, bool); 3] = [
            (0xC123, 0x01, true),  // OS
            (0xA456, 0x02, false), // BASIC
            (0x5321, 0x80, false), // セルフテスト
        ];

        for &(addr, bit, active_high) in &cases {
            for other in [0x00u8, 0x01, 0x03, 0x80, 0x83, 0xFF] {
                // セルフテストはOS有効時のみ見える
                let other = if bit == 0x80 { other | 0x01 } else { other };
                let (on, off) = if active_high {
                    (other | bit, other & !bit)
                } else {
                    (other & !bit, other | bit)
                };

                let mut mem = memory();
                mem.apply_portb(off);
                assert_eq!(mem.access(addr), Access::Ram);
                mem.poke(addr, 0x42);

                mem.apply_portb(on);
                assert_eq!(mem.access(addr), Access::Rom);
                assert_ne!(mem.peek(addr), 0x42);

                mem.apply_portb(off);
                assert_eq!(mem.access(addr), Access::Ram);
                assert_eq!(mem.peek(addr), 0x42, "addr ${:04X} other ${:02X}", addr, other);
            }
        }
    }

    #[test]
    fn test_disk_slots() {
        let mut mem = memory();
        let mut atr = vec![0u8; 16 + 720 * 128];
        atr[0] = 0x96;
        atr[1] = 0x02;
        atr[4] = 0x80;

        assert!(matches!(mem.mount_disk(0, 1), Err(A8Error::MissingResource(_))));
        let index = mem.upload_disk(0, "TEST.ATR", atr.clone()).unwrap();
        assert_eq!(mem.host_slot(0), index);
        assert!(mem.upload_disk(9, "X.ATR", atr.clone()).is_err());

        mem.mount_disk(0, 1).unwrap();
        assert_eq!(mem.device_slot(1), index);
        assert!(mem.disk_for_device(1).is_some());
        assert!(mem.disk_for_device(2).is_none());

        mem.unmount_disk(1);
        assert_eq!(mem.device_slot(1), NO_IMAGE);
        assert_eq!(mem.export_disk(0).map(|d| d.len()), Some(atr.len()));
    }
}
