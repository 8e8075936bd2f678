//! A8RS - Atari 8-bit Computer Emulator in Rust
//!
//! Version 0.1
//!
//! A8RS は Rust で書かれた Atari 800XL エミュレータのヘッドレス実行器です。
//!
//! # 使用方法
//! ```text
//! a8rs --os-rom atarixl.rom --basic-rom ataribas.rom --disk dos.atr --frames 300 --screenshot out.png
//! ```

use a8rs::antic::{SCREEN_HEIGHT, SCREEN_WIDTH};
use a8rs::config::{Config, VideoStandard};
use a8rs::trace;
use a8rs::Atari800;
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;

/// 起動時にOPTIONを押し続けるフレーム数
const OPTION_HOLD_FRAMES: u64 = 120;

/// A8RS - Atari 8-bit Computer Emulator in Rust
#[derive(Parser, Debug)]
#[command(name = "a8rs")]
#[command(author = "A8RS Project")]
#[command(version = "0.1.0")]
#[command(about = "A8RS - Atari 8-bit Computer Emulator in Rust", long_about = None)]
struct Args {
    /// OS ROM (16KB)
    #[arg(long)]
    os_rom: Option<String>,

    /// BASIC ROM (8KB)
    #[arg(long)]
    basic_rom: Option<String>,

    /// ディスクイメージ（ATR）。指定順にD1:, D2:, ... へマウント
    #[arg(short, long)]
    disk: Vec<String>,

    /// H: デバイスの内容を読み込むディレクトリ
    #[arg(long)]
    hdir: Option<String>,

    /// 実行するフレーム数
    #[arg(long, default_value = "300")]
    frames: u64,

    /// テレビ方式 (ntsc, pal)
    #[arg(long)]
    video: Option<VideoStandard>,

    /// BASICを無効にして起動（起動中OPTIONを押し続ける）
    #[arg(long)]
    no_basic: bool,

    /// 終了時のスクリーンショット（PNG）
    #[arg(long)]
    screenshot: Option<PathBuf>,

    /// 設定ファイル
    #[arg(long)]
    config: Option<PathBuf>,

    /// プロトコルトレース: none, sio, cio, dlist, irq, all
    /// 複数指定可: sio+cio
    #[arg(long, default_value = "none")]
    trace: String,
}

/// スクリーンショットをPNGで保存
fn save_screenshot(path: &PathBuf, fb: &[u32], width: usize, height: usize) -> Result<(), Box<dyn std::error::Error>> {
    let file = std::fs::File::create(path)?;
    let w = std::io::BufWriter::new(file);
    let mut encoder = png::Encoder::new(w, width as u32, height as u32);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);

    let mut writer = encoder.write_header()?;

    let mut rgb_data = Vec::with_capacity(width * height * 3);
    for pixel in fb.iter() {
        rgb_data.push(((pixel >> 16) & 0xFF) as u8);
        rgb_data.push(((pixel >> 8) & 0xFF) as u8);
        rgb_data.push((pixel & 0xFF) as u8);
    }

    writer.write_image_data(&rgb_data)?;
    Ok(())
}

/// コマンドライン引数で設定を上書き
fn apply_args(config: &mut Config, args: &Args) {
    if let Some(ref path) = args.os_rom {
        config.os_rom = path.clone();
    }
    if let Some(ref path) = args.basic_rom {
        config.basic_rom = Some(path.clone());
    }
    if !args.disk.is_empty() {
        config.disks = args.disk.clone();
    }
    if let Some(ref dir) = args.hdir {
        config.h_dir = Some(dir.clone());
    }
    if let Some(video) = args.video {
        config.machine.video = video;
    }
}

fn main() {
    env_logger::init();

    let args = Args::parse();

    // トレースレベルを設定
    trace::set_trace_level(trace::parse_trace_flags(&args.trace));

    let mut config = match args.config {
        Some(ref path) => Config::load_from(path),
        None => Config::load(),
    };
    apply_args(&mut config, &args);

    // バナー表示
    println!("A8RS - Atari 8-bit Emulator v0.1 ({:?})", config.machine.video);

    let mut emu = match Atari800::from_config(&config) {
        Ok(emu) => emu,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    run_headless(&mut emu, args.frames, args.no_basic);

    if let Some(ref path) = args.screenshot {
        let fb = emu.frame_rgb();
        match save_screenshot(path, &fb, SCREEN_WIDTH, SCREEN_HEIGHT) {
            Ok(()) => println!("Screenshot saved: {}", path.display()),
            Err(e) => {
                eprintln!("Failed to save screenshot: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn run_headless(emu: &mut Atari800, frames: u64, no_basic: bool) {
    let start = Instant::now();
    let start_cycles = emu.total_cycles();

    for frame in 0..frames {
        if no_basic {
            emu.set_console(false, false, frame < OPTION_HOLD_FRAMES);
        }
        emu.run_frame();
    }

    let elapsed = start.elapsed();
    let cycles = emu.total_cycles() - start_cycles;
    let mhz = (cycles as f64) / elapsed.as_secs_f64().max(1e-9) / 1_000_000.0;
    println!("Executed {} frames ({} cycles) in {:?} ({:.2} MHz effective)", frames, cycles, elapsed, mhz);
    println!("Final PC: ${:04X}", emu.cpu.regs.pc);
}
