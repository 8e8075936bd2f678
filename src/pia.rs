//! PIA (6520): ジョイスティックポートとバンク切り替え
//!
//! $D300 PORTA / $D301 PORTB / $D302 PACTL / $D303 PBCTL（$D3xxでミラー）。
//! 制御レジスタのbit2が0の間、ポートアドレスはDDRを指す。

pub const PORTA: u8 = 0x00;
pub const PORTB: u8 = 0x01;
pub const PACTL: u8 = 0x02;
pub const PBCTL: u8 = 0x03;

/// PIAの状態
#[derive(Debug, Clone)]
pub struct Pia {
    porta_out: u8,
    porta_ddr: u8,
    portb_out: u8,
    portb_ddr: u8,
    pactl: u8,
    pbctl: u8,
    /// ジョイスティック入力（0 = 押下、下位4ビットがスティック0）
    stick_input: u8,
}

impl Default for Pia {
    fn default() -> Self {
        Self::new()
    }
}

impl Pia {
    pub fn new() -> Self {
        Pia {
            porta_out: 0,
            porta_ddr: 0,
            portb_out: 0,
            portb_ddr: 0,
            pactl: 0x3C,
            pbctl: 0x3C,
            stick_input: 0xFF,
        }
    }

    pub fn reset(&mut self) {
        let stick_input = self.stick_input;
        *self = Self::new();
        self.stick_input = stick_input;
    }

    pub fn read(&self, reg: u8) -> u8 {
        match reg & 0x03 {
            PORTA => {
                if self.pactl & 0x04 == 0 {
                    self.porta_ddr
                } else {
                    (self.porta_out & self.porta_ddr) | (self.stick_input & !self.porta_ddr)
                }
            }
            PORTB => {
                if self.pbctl & 0x04 == 0 {
                    self.portb_ddr
                } else {
                    self.portb_output()
                }
            }
            PACTL => self.pactl,
            _ => self.pbctl,
        }
    }

    pub fn write(&mut self, reg: u8, value: u8) {
        match reg & 0x03 {
            PORTA => {
                if self.pactl & 0x04 == 0 {
                    self.porta_ddr = value;
                } else {
                    self.porta_out = value;
                }
            }
            PORTB => {
                if self.pbctl & 0x04 == 0 {
                    self.portb_ddr = value;
                } else {
                    self.portb_out = value;
                }
            }
            PACTL => self.pactl = value,
            _ => self.pbctl = value,
        }
    }

    /// PORTBピンの実効値（入力ピンはプルアップで1）
    pub fn portb_output(&self) -> u8 {
        (self.portb_out & self.portb_ddr) | !self.portb_ddr
    }

    /// SIOコマンドライン（PBCTLのCB2出力がLow）
    ///
    /// OSは$34でアサート、$3Cで解除する。
    pub fn command_line(&self) -> bool {
        self.pbctl & 0x38 == 0x30
    }

    /// ジョイスティックの方向ビットを設定（port 0/1、bit0=上 bit1=下 bit2=左 bit3=右、1 = 押下）
    pub fn set_stick(&mut self, port: usize, directions: u8) {
        let shift = if port == 0 { 0 } else { 4 };
        let mask = 0x0F << shift;
        let active_low = !(directions & 0x0F) << shift;
        self.stick_input = (self.stick_input & !mask) | (active_low & mask);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_portb_defaults_to_inputs() {
        let pia = Pia::new();
        assert_eq!(pia.portb_output(), 0xFF);
    }

    #[test]
    fn test_ddr_select() {
        let mut pia = Pia::new();
        pia.write(PBCTL, 0x38); // DDR選択
        pia.write(PORTB, 0xFF);
        pia.write(PBCTL, 0x3C);
        pia.write(PORTB, 0xFD);
        assert_eq!(pia.read(PORTB), 0xFD);
        assert_eq!(pia.portb_output(), 0xFD);
        pia.write(PBCTL, 0x38);
        assert_eq!(pia.read(PORTB), 0xFF);
    }

    #[test]
    fn test_command_line() {
        let mut pia = Pia::new();
        assert!(!pia.command_line());
        pia.write(PBCTL, 0x34);
        assert!(pia.command_line());
        pia.write(PBCTL, 0x3C);
        assert!(!pia.command_line());
    }

    #[test]
    fn test_stick_bits() {
        let mut pia = Pia::new();
        pia.set_stick(0, 0x01);
        pia.set_stick(1, 0x08);
        assert_eq!(pia.read(PORTA), 0x7E);
        pia.set_stick(0, 0);
        assert_eq!(pia.read(PORTA), 0x7F);
    }
}
