use std::{
	fs, io,
	path::{Path, PathBuf},
};

use thiserror::Error;

const HEADER_END: usize = 0x0150;
const TITLE_START: usize = 0x0134;
const RAW_TITLE_LEN: usize = 12;

/// Master-oscillator cycles per RTC second.
const RTC_CYCLES_PER_SECOND: u32 = 4_194_304;

#[derive(Debug, Error)]
pub enum LoadError {
	#[error("failed to read ROM file: {0}")]
	Io(#[from] io::Error),
	#[error("ROM image is too short to contain a cartridge header ({0} bytes)")]
	TooShort(usize),
	#[error("unsupported cartridge type byte {0:#04X}")]
	UnsupportedMbc(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbcType {
	NoMbc,
	Mbc1,
	Mbc2,
	Mbc3,
	Mbc5,
}

#[derive(Debug)]
pub struct Cartridge {
	pub rom: Vec<u8>,
	pub ram: Vec<u8>,
	pub mbc: MbcType,
	pub cgb: bool,
	pub title: String,
	raw_title: [u8; RAW_TITLE_LEN],
	cart_type: u8,
	/// Header checks (logo, checksum) passed. A bad header is accepted but
	/// flagged so the host can surface it.
	pub header_valid: bool,
	save_path: Option<PathBuf>,
	mbc_state: MbcState,
}

#[derive(Debug)]
enum MbcState {
	NoMbc,
	Mbc1 {
		rom_bank: u8,
		ram_bank: u8,
		mode: u8,
		ram_enable: bool,
	},
	Mbc2 {
		rom_bank: u8,
		ram_enable: bool,
	},
	Mbc3 {
		rom_bank: u8,
		ram_bank: u8,
		ram_enable: bool,
		rtc: Option<Rtc>,
		latch_pending: bool,
	},
	Mbc5 {
		rom_bank: u16,
		ram_bank: u8,
		ram_enable: bool,
	},
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RtcRegisters {
	pub seconds: u8,
	pub minutes: u8,
	pub hours: u8,
	pub days: u16,
	pub halt: bool,
	pub carry: bool,
}

impl RtcRegisters {
	fn control_byte(&self) -> u8 {
		let mut out = ((self.days >> 8) as u8) & 0x01;
		if self.halt {
			out |= 0x40;
		}
		if self.carry {
			out |= 0x80;
		}
		out
	}
}

/// MBC3 real-time clock, advanced by emulated cycles so runs are
/// deterministic for a given input stream.
#[derive(Debug, Clone, Default)]
struct Rtc {
	regs: RtcRegisters,
	latched: RtcRegisters,
	subsecond_cycles: u32,
}

impl Rtc {
	fn latch(&mut self) {
		self.latched = self.regs;
	}

	fn read_latched(&self, reg: u8) -> u8 {
		match reg {
			0x08 => self.latched.seconds & 0x3F,
			0x09 => self.latched.minutes & 0x3F,
			0x0A => self.latched.hours & 0x1F,
			0x0B => (self.latched.days & 0x00FF) as u8,
			0x0C => self.latched.control_byte(),
			_ => 0xFF,
		}
	}

	fn write_register(&mut self, reg: u8, value: u8) {
		match reg {
			0x08 => {
				self.regs.seconds = value & 0x3F;
				self.subsecond_cycles = 0;
			}
			0x09 => self.regs.minutes = value & 0x3F,
			0x0A => self.regs.hours = value & 0x1F,
			0x0B => self.regs.days = (self.regs.days & 0x0100) | value as u16,
			0x0C => {
				self.regs.days = (self.regs.days & 0x00FF) | (((value & 0x01) as u16) << 8);
				self.regs.halt = value & 0x40 != 0;
				self.regs.carry = value & 0x80 != 0;
			}
			_ => {}
		}
	}

	fn step(&mut self, cycles: u32) {
		if self.regs.halt {
			return;
		}
		let mut sub = self.subsecond_cycles + cycles;
		while sub >= RTC_CYCLES_PER_SECOND {
			sub -= RTC_CYCLES_PER_SECOND;
			self.advance_second();
		}
		self.subsecond_cycles = sub;
	}

	fn advance_second(&mut self) {
		self.regs.seconds = (self.regs.seconds + 1) & 0x3F;
		if self.regs.seconds != 60 {
			return;
		}
		self.regs.seconds = 0;
		self.regs.minutes = (self.regs.minutes + 1) & 0x3F;
		if self.regs.minutes != 60 {
			return;
		}
		self.regs.minutes = 0;
		self.regs.hours = (self.regs.hours + 1) & 0x1F;
		if self.regs.hours != 24 {
			return;
		}
		self.regs.hours = 0;
		if self.regs.days == 0x01FF {
			self.regs.days = 0;
			self.regs.carry = true;
		} else {
			self.regs.days += 1;
		}
	}
}

impl Cartridge {
	/// Parse a raw cartridge image. Malformed headers are accepted but
	/// flagged; an unsupported mapper is fatal.
	pub fn load(data: Vec<u8>) -> Result<Self, LoadError> {
		if data.len() < HEADER_END {
			return Err(LoadError::TooShort(data.len()));
		}

		let header = Header::parse(&data);
		let cart_type = header.cart_type();
		let mbc = header.mbc_type().ok_or(LoadError::UnsupportedMbc(cart_type))?;
		let ram_size = header.ram_size();
		let header_valid = header.logo_valid() && header.checksum_valid();
		if !header_valid {
			core_warn!(target: "cartridge", "malformed header (logo or checksum mismatch), continuing");
		}

		let has_rtc = matches!(cart_type, 0x0F | 0x10);
		let mbc_state = match mbc {
			MbcType::NoMbc => MbcState::NoMbc,
			MbcType::Mbc1 => MbcState::Mbc1 {
				rom_bank: 1,
				ram_bank: 0,
				mode: 0,
				ram_enable: false,
			},
			MbcType::Mbc2 => MbcState::Mbc2 {
				rom_bank: 1,
				ram_enable: false,
			},
			MbcType::Mbc3 => MbcState::Mbc3 {
				rom_bank: 1,
				ram_bank: 0,
				ram_enable: false,
				rtc: has_rtc.then(Rtc::default),
				latch_pending: false,
			},
			MbcType::Mbc5 => MbcState::Mbc5 {
				rom_bank: 1,
				ram_bank: 0,
				ram_enable: false,
			},
		};

		let mut raw_title = [0u8; RAW_TITLE_LEN];
		raw_title.copy_from_slice(&data[TITLE_START..TITLE_START + RAW_TITLE_LEN]);

		Ok(Self {
			ram: vec![0; ram_size],
			mbc,
			cgb: header.cgb_supported(),
			title: header.title(),
			raw_title,
			cart_type,
			header_valid,
			save_path: None,
			mbc_state,
			rom: data,
		})
	}

	pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
		let data = fs::read(&path)?;
		let mut cart = Self::load(data)?;
		if cart.has_battery() {
			let mut save = PathBuf::from(path.as_ref());
			save.set_extension("sram");
			if let Ok(bytes) = fs::read(&save) {
				cart.load_sram(&bytes);
			}
			cart.save_path = Some(save);
		}
		core_info!(target: "cartridge", "loaded {:?} (mbc={:?} cgb={})", cart.title, cart.mbc, cart.cgb);
		Ok(cart)
	}

	/// The 12 raw title bytes, used as the savestate identity check.
	pub fn raw_title(&self) -> &[u8; RAW_TITLE_LEN] {
		&self.raw_title
	}

	pub fn has_battery(&self) -> bool {
		matches!(
			self.cart_type,
			0x03 | 0x06 | 0x09 | 0x0F | 0x10 | 0x13 | 0x1B | 0x1E
		)
	}

	/// Advance the RTC (if any) by emulated master cycles.
	pub fn step_rtc(&mut self, cycles: u32) {
		if let MbcState::Mbc3 { rtc: Some(rtc), .. } = &mut self.mbc_state {
			rtc.step(cycles);
		}
	}

	/// Snapshot of external RAM for battery-backed persistence.
	pub fn save_sram(&self) -> Vec<u8> {
		self.ram.clone()
	}

	/// Restore external RAM from a persisted blob; excess bytes are ignored
	/// and a short blob leaves the tail untouched.
	pub fn load_sram(&mut self, bytes: &[u8]) {
		for (dst, src) in self.ram.iter_mut().zip(bytes.iter()) {
			*dst = *src;
		}
	}

	pub fn save_sram_to_file(&self) -> io::Result<()> {
		if let (true, Some(path)) = (self.has_battery(), &self.save_path)
			&& !self.ram.is_empty()
		{
			fs::write(path, &self.ram)?;
		}
		Ok(())
	}

	pub fn read(&self, addr: u16) -> u8 {
		let rom_bank_count = (self.rom.len() / 0x4000).max(1);
		match (&self.mbc_state, addr) {
			(MbcState::NoMbc, 0x0000..=0x7FFF) => {
				self.rom.get(addr as usize).copied().unwrap_or(0xFF)
			}
			(MbcState::Mbc1 { ram_bank, mode, .. }, 0x0000..=0x3FFF) => {
				// In mode 1 the upper bank bits also remap the fixed region.
				let bank = if *mode == 0 {
					0
				} else {
					(((*ram_bank as usize) & 0x03) << 5) % rom_bank_count
				};
				let offset = bank * 0x4000 + addr as usize;
				self.rom.get(offset).copied().unwrap_or(0xFF)
			}
			(
				MbcState::Mbc1 {
					rom_bank, ram_bank, ..
				},
				0x4000..=0x7FFF,
			) => {
				let mut bank = (((*ram_bank as usize) & 0x03) << 5) | (*rom_bank as usize & 0x1F);
				if bank & 0x1F == 0 {
					bank += 1;
				}
				bank %= rom_bank_count;
				let offset = bank * 0x4000 + (addr as usize - 0x4000);
				self.rom.get(offset).copied().unwrap_or(0xFF)
			}
			(MbcState::Mbc2 { .. }, 0x0000..=0x3FFF)
			| (MbcState::Mbc3 { .. }, 0x0000..=0x3FFF)
			| (MbcState::Mbc5 { .. }, 0x0000..=0x3FFF) => {
				self.rom.get(addr as usize).copied().unwrap_or(0xFF)
			}
			(MbcState::Mbc2 { rom_bank, .. }, 0x4000..=0x7FFF) => {
				let bank = (*rom_bank as usize).max(1) % rom_bank_count;
				let offset = bank * 0x4000 + (addr as usize - 0x4000);
				self.rom.get(offset).copied().unwrap_or(0xFF)
			}
			(MbcState::Mbc3 { rom_bank, .. }, 0x4000..=0x7FFF) => {
				let bank = (*rom_bank as usize).max(1) % rom_bank_count;
				let offset = bank * 0x4000 + (addr as usize - 0x4000);
				self.rom.get(offset).copied().unwrap_or(0xFF)
			}
			(MbcState::Mbc5 { rom_bank, .. }, 0x4000..=0x7FFF) => {
				// MBC5 can genuinely map bank 0 into the switch region.
				let bank = (*rom_bank as usize) % rom_bank_count;
				let offset = bank * 0x4000 + (addr as usize - 0x4000);
				self.rom.get(offset).copied().unwrap_or(0xFF)
			}
			(MbcState::NoMbc, 0xA000..=0xBFFF) => self
				.ram
				.get(addr as usize - 0xA000)
				.copied()
				.unwrap_or(0xFF),
			(MbcState::Mbc1 { ram_enable, .. }, 0xA000..=0xBFFF)
			| (MbcState::Mbc5 { ram_enable, .. }, 0xA000..=0xBFFF) => {
				if !*ram_enable {
					0xFF
				} else {
					self.ram.get(self.ram_index(addr)).copied().unwrap_or(0xFF)
				}
			}
			(MbcState::Mbc2 { ram_enable, .. }, 0xA000..=0xBFFF) => {
				if !*ram_enable {
					0xFF
				} else {
					// 512x4-bit internal RAM, mirrored across the region.
					let idx = (addr as usize - 0xA000) & 0x01FF;
					0xF0 | (self.ram.get(idx).copied().unwrap_or(0x0F) & 0x0F)
				}
			}
			(
				MbcState::Mbc3 {
					ram_enable,
					ram_bank,
					rtc,
					..
				},
				0xA000..=0xBFFF,
			) => {
				if !*ram_enable {
					0xFF
				} else {
					match *ram_bank {
						0x00..=0x03 => {
							let idx = (*ram_bank as usize) * 0x2000 + addr as usize - 0xA000;
							self.ram.get(idx).copied().unwrap_or(0xFF)
						}
						0x08..=0x0C => rtc
							.as_ref()
							.map(|r| r.read_latched(*ram_bank))
							.unwrap_or(0xFF),
						_ => 0xFF,
					}
				}
			}
			_ => 0xFF,
		}
	}

	pub fn write(&mut self, addr: u16, val: u8) {
		match (&mut self.mbc_state, addr) {
			(MbcState::NoMbc, 0xA000..=0xBFFF) => {
				let idx = addr as usize - 0xA000;
				if let Some(b) = self.ram.get_mut(idx) {
					*b = val;
				}
			}
			(MbcState::Mbc1 { ram_enable, .. }, 0x0000..=0x1FFF) => {
				*ram_enable = val & 0x0F == 0x0A;
			}
			(MbcState::Mbc1 { rom_bank, .. }, 0x2000..=0x3FFF) => {
				*rom_bank = val & 0x1F;
				if *rom_bank == 0 {
					*rom_bank = 1;
				}
			}
			(MbcState::Mbc1 { ram_bank, .. }, 0x4000..=0x5FFF) => {
				*ram_bank = val & 0x03;
			}
			(MbcState::Mbc1 { mode, .. }, 0x6000..=0x7FFF) => {
				*mode = val & 0x01;
			}
			(MbcState::Mbc1 { .. }, 0xA000..=0xBFFF) => {
				if let MbcState::Mbc1 {
					ram_enable: true, ..
				} = self.mbc_state
				{
					let idx = self.ram_index(addr);
					if let Some(b) = self.ram.get_mut(idx) {
						*b = val;
					}
				}
			}
			(
				MbcState::Mbc2 {
					rom_bank,
					ram_enable,
				},
				0x0000..=0x3FFF,
			) => {
				// Address bit 8 selects between RAM enable and bank select.
				if addr & 0x0100 == 0 {
					*ram_enable = val & 0x0F == 0x0A;
				} else {
					*rom_bank = val & 0x0F;
					if *rom_bank == 0 {
						*rom_bank = 1;
					}
				}
			}
			(MbcState::Mbc2 { ram_enable, .. }, 0xA000..=0xBFFF) => {
				if *ram_enable {
					let idx = (addr as usize - 0xA000) & 0x01FF;
					if let Some(b) = self.ram.get_mut(idx) {
						*b = val & 0x0F;
					}
				}
			}
			(MbcState::Mbc3 { ram_enable, .. }, 0x0000..=0x1FFF) => {
				*ram_enable = val & 0x0F == 0x0A;
			}
			(MbcState::Mbc3 { rom_bank, .. }, 0x2000..=0x3FFF) => {
				*rom_bank = val & 0x7F;
				if *rom_bank == 0 {
					*rom_bank = 1;
				}
			}
			(MbcState::Mbc3 { ram_bank, .. }, 0x4000..=0x5FFF) => {
				*ram_bank = val & 0x0F;
			}
			(
				MbcState::Mbc3 {
					latch_pending, rtc, ..
				},
				0x6000..=0x7FFF,
			) => {
				// Latch protocol: write 0x00 then 0x01.
				if val == 0 {
					*latch_pending = true;
				} else {
					if val == 1
						&& *latch_pending
						&& let Some(rtc) = rtc
					{
						rtc.latch();
					}
					*latch_pending = false;
				}
			}
			(
				MbcState::Mbc3 {
					ram_enable,
					ram_bank,
					rtc,
					..
				},
				0xA000..=0xBFFF,
			) => {
				if *ram_enable {
					match *ram_bank {
						0x00..=0x03 => {
							let idx = (*ram_bank as usize) * 0x2000 + addr as usize - 0xA000;
							if let Some(b) = self.ram.get_mut(idx) {
								*b = val;
							}
						}
						0x08..=0x0C => {
							if let Some(rtc) = rtc.as_mut() {
								rtc.write_register(*ram_bank, val);
							}
						}
						_ => {}
					}
				}
			}
			(MbcState::Mbc5 { ram_enable, .. }, 0x0000..=0x1FFF) => {
				*ram_enable = val & 0x0F == 0x0A;
			}
			(MbcState::Mbc5 { rom_bank, .. }, 0x2000..=0x2FFF) => {
				*rom_bank = (*rom_bank & 0x100) | val as u16;
			}
			(MbcState::Mbc5 { rom_bank, .. }, 0x3000..=0x3FFF) => {
				*rom_bank = (*rom_bank & 0x0FF) | (((val & 0x01) as u16) << 8);
			}
			(MbcState::Mbc5 { ram_bank, .. }, 0x4000..=0x5FFF) => {
				*ram_bank = val & 0x0F;
			}
			(MbcState::Mbc5 { .. }, 0xA000..=0xBFFF) => {
				if let MbcState::Mbc5 {
					ram_enable: true, ..
				} = self.mbc_state
				{
					let idx = self.ram_index(addr);
					if let Some(b) = self.ram.get_mut(idx) {
						*b = val;
					}
				}
			}
			_ => {}
		}
	}

	fn ram_index(&self, addr: u16) -> usize {
		let ram_bank_count = self.ram.len().div_ceil(0x2000);
		match &self.mbc_state {
			MbcState::NoMbc | MbcState::Mbc2 { .. } => addr as usize - 0xA000,
			MbcState::Mbc1 { ram_bank, mode, .. } => {
				if *mode == 0 || ram_bank_count == 0 {
					addr as usize - 0xA000
				} else {
					((*ram_bank as usize) % ram_bank_count) * 0x2000 + addr as usize - 0xA000
				}
			}
			MbcState::Mbc3 { ram_bank, .. } => {
				((*ram_bank as usize) & 0x03) * 0x2000 + addr as usize - 0xA000
			}
			MbcState::Mbc5 { ram_bank, .. } => {
				let bank = if ram_bank_count == 0 {
					0
				} else {
					(*ram_bank as usize) % ram_bank_count
				};
				bank * 0x2000 + addr as usize - 0xA000
			}
		}
	}

	/// Mapper state exported to the savestate: rom bank, ram bank, flags
	/// byte (ram-enable, mode, latch-pending), RTC registers.
	pub(crate) fn mapper_snapshot(&self) -> ([u8; 4], RtcRegisters, u32) {
		match &self.mbc_state {
			MbcState::NoMbc => ([0, 0, 0, 0], RtcRegisters::default(), 0),
			MbcState::Mbc1 {
				rom_bank,
				ram_bank,
				mode,
				ram_enable,
			} => (
				[
					*rom_bank,
					*ram_bank,
					(*ram_enable as u8) | (*mode << 1),
					0,
				],
				RtcRegisters::default(),
				0,
			),
			MbcState::Mbc2 {
				rom_bank,
				ram_enable,
			} => ([*rom_bank, 0, *ram_enable as u8, 0], RtcRegisters::default(), 0),
			MbcState::Mbc3 {
				rom_bank,
				ram_bank,
				ram_enable,
				rtc,
				latch_pending,
			} => (
				[
					*rom_bank,
					*ram_bank,
					(*ram_enable as u8) | ((*latch_pending as u8) << 2),
					0,
				],
				rtc.as_ref().map(|r| r.regs).unwrap_or_default(),
				rtc.as_ref().map(|r| r.subsecond_cycles).unwrap_or(0),
			),
			MbcState::Mbc5 {
				rom_bank,
				ram_bank,
				ram_enable,
			} => (
				[
					(*rom_bank & 0xFF) as u8,
					*ram_bank,
					(*ram_enable as u8) | (((*rom_bank >> 8) as u8) << 1),
					0,
				],
				RtcRegisters::default(),
				0,
			),
		}
	}

	pub(crate) fn restore_mapper(&mut self, raw: [u8; 4], rtc_regs: RtcRegisters, rtc_sub: u32) {
		match &mut self.mbc_state {
			MbcState::NoMbc => {}
			MbcState::Mbc1 {
				rom_bank,
				ram_bank,
				mode,
				ram_enable,
			} => {
				*rom_bank = raw[0];
				*ram_bank = raw[1];
				*ram_enable = raw[2] & 0x01 != 0;
				*mode = (raw[2] >> 1) & 0x01;
			}
			MbcState::Mbc2 {
				rom_bank,
				ram_enable,
			} => {
				*rom_bank = raw[0];
				*ram_enable = raw[2] & 0x01 != 0;
			}
			MbcState::Mbc3 {
				rom_bank,
				ram_bank,
				ram_enable,
				rtc,
				latch_pending,
			} => {
				*rom_bank = raw[0];
				*ram_bank = raw[1];
				*ram_enable = raw[2] & 0x01 != 0;
				*latch_pending = raw[2] & 0x04 != 0;
				if let Some(rtc) = rtc {
					rtc.regs = rtc_regs;
					rtc.subsecond_cycles = rtc_sub;
					rtc.latch();
				}
			}
			MbcState::Mbc5 {
				rom_bank,
				ram_bank,
				ram_enable,
			} => {
				*rom_bank = raw[0] as u16 | ((((raw[2] >> 1) & 0x01) as u16) << 8);
				*ram_bank = raw[1];
				*ram_enable = raw[2] & 0x01 != 0;
			}
		}
	}
}

struct Header<'a> {
	data: &'a [u8],
}

/// The fixed logo bitmap every licensed cartridge carries at 0x0104.
pub const HEADER_LOGO: [u8; 48] = [
	0xCE, 0xED, 0x66, 0x66, 0xCC, 0x0D, 0x00, 0x0B, 0x03, 0x73, 0x00, 0x83, 0x00, 0x0C, 0x00,
	0x0D, 0x00, 0x08, 0x11, 0x1F, 0x88, 0x89, 0x00, 0x0E, 0xDC, 0xCC, 0x6E, 0xE6, 0xDD, 0xDD,
	0xD9, 0x99, 0xBB, 0xBB, 0x67, 0x63, 0x6E, 0x0E, 0xEC, 0xCC, 0xDD, 0xDC, 0x99, 0x9F, 0xBB,
	0xB9, 0x33, 0x3E,
];

impl<'a> Header<'a> {
	fn parse(data: &'a [u8]) -> Self {
		Self { data }
	}

	fn title(&self) -> String {
		let mut slice = &self.data[0x0134..0x0143];
		if let Some(pos) = slice.iter().position(|&b| b == 0) {
			slice = &slice[..pos];
		}
		String::from_utf8_lossy(slice).trim().to_string()
	}

	fn cgb_supported(&self) -> bool {
		self.data[0x0143] & 0x80 != 0
	}

	fn cart_type(&self) -> u8 {
		self.data[0x0147]
	}

	fn mbc_type(&self) -> Option<MbcType> {
		match self.cart_type() {
			0x00 | 0x08 | 0x09 => Some(MbcType::NoMbc),
			0x01..=0x03 => Some(MbcType::Mbc1),
			0x05 | 0x06 => Some(MbcType::Mbc2),
			0x0F..=0x13 => Some(MbcType::Mbc3),
			0x19..=0x1E => Some(MbcType::Mbc5),
			_ => None,
		}
	}

	fn ram_size(&self) -> usize {
		// MBC2 carries its 512x4-bit RAM regardless of the header code.
		if matches!(self.cart_type(), 0x05 | 0x06) {
			return 0x200;
		}
		match self.data[0x0149] {
			0x00 => 0,
			0x01 => 0x800,
			0x02 => 0x2000,
			0x03 => 0x8000,
			0x04 => 0x20000,
			0x05 => 0x10000,
			_ => 0x2000,
		}
	}

	fn logo_valid(&self) -> bool {
		self.data.get(0x0104..0x0134) == Some(&HEADER_LOGO[..])
	}

	fn checksum_valid(&self) -> bool {
		let mut sum = 0u8;
		for &b in &self.data[0x0134..0x014D] {
			sum = sum.wrapping_sub(b).wrapping_sub(1);
		}
		sum == self.data[0x014D]
	}
}
