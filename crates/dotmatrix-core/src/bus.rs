use crate::{
	apu::Apu,
	cartridge::Cartridge,
	clock::SystemClock,
	dma::{OamDma, VramDma},
	joypad::Joypad,
	ppu::Ppu,
	registers::{Owner, RegisterFile},
	serial::Serial,
	timer::Timer,
};

const WRAM_BANK_SIZE: usize = 0x1000;

/// The memory bus: owns every component except the CPU and arbitrates the
/// 16-bit address space, including VRAM/OAM lockouts, the OAM-DMA bus
/// takeover and the boot-ROM overlay.
pub struct Bus {
	pub wram: [[u8; WRAM_BANK_SIZE]; 8],
	pub wram_bank: usize,
	pub hram: [u8; 0x7F],
	pub cart: Option<Cartridge>,
	pub boot_rom: Option<Vec<u8>>,
	pub boot_mapped: bool,
	pub if_reg: u8,
	pub ie_reg: u8,
	/// CGB speed-switch register: bit 7 current speed, bit 0 armed.
	pub key1: u8,
	pub ppu: Ppu,
	pub apu: Apu,
	pub timer: Timer,
	pub serial: Serial,
	pub joypad: Joypad,
	pub clock: SystemClock,
	pub oam_dma: OamDma,
	pub vram_dma: VramDma,
	pub regs: RegisterFile,
	cgb_mode: bool,
	debug_lock_vram: bool,
	debug_lock_oam: bool,
}

impl Bus {
	/// Post-boot machine state for the selected hardware mode.
	pub fn new_with_mode(cgb: bool) -> Self {
		let mut bus = Self::new_power_on(cgb);
		bus.if_reg = 0xE1;
		// Power-on DIV phase observed after the stock boot ROM.
		bus.timer.div = 0xABCC;
		bus.ppu = Ppu::new_with_mode(cgb);
		bus
	}

	/// Neutral power-on state, suitable for executing a boot ROM.
	pub fn new_power_on(cgb: bool) -> Self {
		Self {
			wram: [[0; WRAM_BANK_SIZE]; 8],
			wram_bank: 1,
			hram: [0; 0x7F],
			cart: None,
			boot_rom: None,
			boot_mapped: false,
			if_reg: 0,
			ie_reg: 0,
			key1: 0,
			ppu: Ppu::new_power_on(cgb),
			apu: Apu::new(),
			timer: Timer::new(),
			serial: Serial::new(cgb),
			joypad: Joypad::new(),
			clock: SystemClock::new(),
			oam_dma: OamDma::new(),
			vram_dma: VramDma::new(),
			regs: RegisterFile::new(cgb),
			cgb_mode: cgb,
			debug_lock_vram: false,
			debug_lock_oam: false,
		}
	}

	#[inline]
	pub fn is_cgb(&self) -> bool {
		self.cgb_mode
	}

	#[inline]
	pub fn double_speed(&self) -> bool {
		self.key1 & 0x80 != 0
	}

	pub fn load_cart(&mut self, cart: Cartridge) {
		self.cart = Some(cart);
	}

	pub fn load_boot_rom(&mut self, data: Vec<u8>) {
		self.boot_rom = Some(data);
		self.boot_mapped = true;
	}

	/// Force VRAM/OAM lockouts from the debugger.
	pub fn lock_memory(&mut self, vram: bool, oam: bool) {
		self.debug_lock_vram = vram;
		self.debug_lock_oam = oam;
	}

	pub fn take_serial(&mut self) -> Vec<u8> {
		self.serial.take_output()
	}

	fn vram_accessible(&self) -> bool {
		if self.debug_lock_vram {
			return false;
		}
		// Mode 3 is pixel transfer; an off LCD never locks.
		!self.ppu.lcd_enabled() || self.clock.mode() != 3
	}

	fn oam_accessible(&self) -> bool {
		if self.debug_lock_oam {
			return false;
		}
		!self.ppu.lcd_enabled() || self.clock.mode() < 2
	}

	/// CPU-visible read. While an OAM DMA is running the CPU can reach only
	/// HRAM; everything else reads open bus.
	pub fn read_byte(&mut self, addr: u16) -> u8 {
		if self.oam_dma.active() && !(0xFF80..=0xFFFE).contains(&addr) {
			return 0xFF;
		}
		self.read_raw(addr, false)
	}

	/// Bus read for the DMA engines: bypasses the OAM-DMA takeover and the
	/// PPU lockouts.
	fn dma_read(&mut self, addr: u16) -> u8 {
		self.read_raw(addr, true)
	}

	fn read_raw(&mut self, addr: u16, dma_engine: bool) -> u8 {
		match addr {
			// Boot overlay: DMG maps 0x0000-0x00FF, CGB additionally
			// 0x0200-0x08FF, leaving the header window visible.
			0x0000..=0x00FF if self.boot_mapped => self
				.boot_rom
				.as_ref()
				.and_then(|b| b.get(addr as usize).copied())
				.unwrap_or(0xFF),
			0x0200..=0x08FF if self.boot_mapped && self.cgb_mode => self
				.boot_rom
				.as_ref()
				.and_then(|b| b.get(addr as usize).copied())
				.unwrap_or(0xFF),
			0x0000..=0x7FFF => self.cart.as_ref().map(|c| c.read(addr)).unwrap_or(0xFF),
			0x8000..=0x9FFF => {
				if dma_engine || self.vram_accessible() {
					self.ppu.vram[self.ppu.vram_bank][(addr - 0x8000) as usize]
				} else {
					0xFF
				}
			}
			0xA000..=0xBFFF => self.cart.as_ref().map(|c| c.read(addr)).unwrap_or(0xFF),
			0xC000..=0xCFFF => self.wram[0][(addr - 0xC000) as usize],
			0xD000..=0xDFFF => self.wram[self.wram_bank][(addr - 0xD000) as usize],
			// Echo of 0xC000-0xDDFF.
			0xE000..=0xEFFF => self.wram[0][(addr - 0xE000) as usize],
			0xF000..=0xFDFF => self.wram[self.wram_bank][(addr - 0xF000) as usize],
			0xFE00..=0xFE9F => {
				if dma_engine || self.oam_accessible() {
					self.ppu.oam[(addr - 0xFE00) as usize]
				} else {
					0xFF
				}
			}
			0xFEA0..=0xFEFF => 0x00,
			0xFF00..=0xFF7F => self.io_read(addr),
			0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize],
			0xFFFF => self.ie_reg,
		}
	}

	pub fn write_byte(&mut self, addr: u16, val: u8) {
		if self.oam_dma.active() && !(0xFF80..=0xFFFE).contains(&addr) {
			return;
		}
		match addr {
			0x0000..=0x7FFF | 0xA000..=0xBFFF => {
				if let Some(cart) = self.cart.as_mut() {
					cart.write(addr, val);
				}
			}
			0x8000..=0x9FFF => {
				if self.vram_accessible() {
					self.ppu.vram[self.ppu.vram_bank][(addr - 0x8000) as usize] = val;
				}
			}
			0xC000..=0xCFFF => self.wram[0][(addr - 0xC000) as usize] = val,
			0xD000..=0xDFFF => self.wram[self.wram_bank][(addr - 0xD000) as usize] = val,
			0xE000..=0xEFFF => self.wram[0][(addr - 0xE000) as usize] = val,
			0xF000..=0xFDFF => self.wram[self.wram_bank][(addr - 0xF000) as usize] = val,
			0xFE00..=0xFE9F => {
				if self.oam_accessible() {
					self.ppu.oam[(addr - 0xFE00) as usize] = val;
				}
			}
			0xFEA0..=0xFEFF => {}
			0xFF00..=0xFF7F => self.io_write(addr, val),
			0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize] = val,
			0xFFFF => self.ie_reg = val,
		}
	}

	/// Read an I/O register: dispatch to the owning component, then apply
	/// the descriptor's read mask.
	pub fn io_read(&mut self, addr: u16) -> u8 {
		let reg = *self.regs.descriptor(addr);
		let raw = match reg.owner {
			Owner::System => self.system_read(addr),
			Owner::Timer => self.timer.read(addr),
			Owner::Serial => self.serial.read(addr),
			Owner::Joypad => self.joypad.read(),
			Owner::Ppu => self.ppu.read_reg(addr),
			Owner::Apu => {
				if addr >= 0xFF76 {
					self.apu.read_pcm(addr)
				} else {
					self.apu.read_reg(addr)
				}
			}
			Owner::Dma => {
				if addr == 0xFF46 {
					self.oam_dma.reg
				} else {
					self.vram_dma.read_reg(addr)
				}
			}
			Owner::Clock => self.clock.read_reg(addr),
		};
		reg.apply_read(raw)
	}

	/// Write an I/O register: narrow through the descriptor's write mask,
	/// then dispatch to the owning component's write hook.
	pub fn io_write(&mut self, addr: u16, val: u8) {
		let reg = *self.regs.descriptor(addr);
		match reg.owner {
			Owner::System => self.system_write(addr, val),
			Owner::Timer => self.timer.write(addr, val, &mut self.if_reg),
			Owner::Serial => self.serial.write(addr, val),
			Owner::Joypad => self.joypad.write(val),
			Owner::Ppu => {
				if addr == 0xFF40 {
					let was_on = self.ppu.lcd_enabled();
					self.ppu.write_reg(addr, val);
					let now_on = self.ppu.lcd_enabled();
					if was_on && !now_on {
						// No more HBlanks will arrive; drain a pending
						// HBlank DMA, then park the line counters.
						self.complete_active_hdma();
						self.clock.reset_scanline(false);
					} else if !was_on && now_on {
						self.clock.reset_scanline(true);
					}
				} else {
					self.ppu.write_reg(addr, val);
				}
			}
			Owner::Apu => self.apu.write_reg(addr, val),
			Owner::Dma => self.dma_write(addr, val),
			Owner::Clock => {
				let lcd_on = self.ppu.lcd_enabled();
				self.clock.write_reg(addr, val, lcd_on, &mut self.if_reg);
			}
		}
	}

	fn system_read(&self, addr: u16) -> u8 {
		match addr {
			0xFF0F => self.if_reg,
			0xFF4D => self.key1,
			0xFF70 => self.wram_bank as u8,
			_ => self.regs.scratch(addr),
		}
	}

	fn system_write(&mut self, addr: u16, val: u8) {
		let reg = *self.regs.descriptor(addr);
		match addr {
			0xFF0F => self.if_reg = reg.apply_write(self.if_reg, val),
			0xFF4D => self.key1 = reg.apply_write(self.key1, val),
			0xFF50 => {
				// Any nonzero write retires the boot overlay for good.
				if val != 0 && self.boot_mapped {
					self.boot_mapped = false;
					core_info!(target: "bus", "boot ROM overlay disabled");
				}
			}
			0xFF70 => {
				let bank = (val & 0x07) as usize;
				self.wram_bank = bank.max(1);
			}
			_ => self.regs.write_scratch(addr, val),
		}
	}

	fn dma_write(&mut self, addr: u16, val: u8) {
		match addr {
			0xFF46 => self.oam_dma.start(val),
			0xFF51..=0xFF54 => self.vram_dma.write_reg(addr, val),
			0xFF55 => {
				self.vram_dma.write_control(val);
				if self.vram_dma.active()
					&& !self.vram_dma.suspends_cpu()
					&& (!self.ppu.lcd_enabled() || self.clock.in_hblank())
				{
					// An HBlank transfer scheduled outside of active drawing
					// moves its first block immediately.
					self.hdma_transfer_block();
				}
			}
			_ => {}
		}
	}

	/// Move one byte of an active OAM DMA. Called once per CPU-rate cycle;
	/// the 160-byte table completes in exactly 160 such cycles.
	pub fn oam_dma_step(&mut self, cycles: u16) {
		for _ in 0..cycles {
			if !self.oam_dma.active() {
				return;
			}
			let idx = self.oam_dma.cursor();
			let byte = self.dma_read(self.oam_dma.src.wrapping_add(idx));
			self.ppu.oam[idx as usize] = byte;
			self.oam_dma.remaining -= 1;
		}
	}

	/// Move bytes of an active general VRAM DMA, two per master cycle. The
	/// CPU is suspended while this runs.
	pub fn vram_dma_step(&mut self) {
		if !self.vram_dma.suspends_cpu() {
			return;
		}
		for _ in 0..2 {
			if !self.vram_dma.active() {
				break;
			}
			self.vram_dma_move_byte();
		}
	}

	/// One 16-byte HBlank DMA burst, triggered on each entry into mode 0.
	pub fn hdma_hblank_transfer(&mut self) {
		if self.vram_dma.active() && !self.vram_dma.suspends_cpu() {
			self.hdma_transfer_block();
		}
	}

	fn hdma_transfer_block(&mut self) {
		for _ in 0..16 {
			if !self.vram_dma.active() {
				break;
			}
			self.vram_dma_move_byte();
		}
	}

	fn complete_active_hdma(&mut self) {
		while self.vram_dma.active() && !self.vram_dma.suspends_cpu() {
			self.vram_dma_move_byte();
		}
	}

	fn vram_dma_move_byte(&mut self) {
		let byte = self.dma_read(self.vram_dma.src);
		let dst = self.vram_dma.dst;
		// DMA writes bypass the mode 3 lockout.
		self.ppu.vram[self.ppu.vram_bank][(dst - 0x8000) as usize] = byte;
		self.vram_dma.advance(1);
	}

	/// True while the CPU is suspended by a general VRAM DMA.
	pub fn cpu_suspended(&self) -> bool {
		self.vram_dma.suspends_cpu()
	}
}
