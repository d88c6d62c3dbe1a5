//! Savestate codec.
//!
//! The format is explicit little-endian binary: a 16-byte preamble (flags,
//! version, cartridge title, IE, IME), an optional SRAM image, one block per
//! component in a fixed enumeration order, and finally the 128-byte I/O
//! register page. Every block is prefixed by a 13-byte header
//! `{id: u32, read_only: u8, offset: u16, n_bytes: u16, n_banks: u16,
//! bank_select: u16}`; a header that does not match the current component
//! layout logs a warning and loading continues (behavior is then undefined
//! but the session survives).

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::bus::Bus;
use crate::cartridge::RtcRegisters;
use crate::cpu::Cpu;
use crate::dma::VramDmaMode;
use crate::registers::Owner;

pub const SAVESTATE_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum SavestateError {
	#[error("savestate I/O error: {0}")]
	Io(#[from] io::Error),
}

/// Flags byte of the preamble.
const FLAG_CGB: u8 = 0x01;
const FLAG_STOP: u8 = 0x02;
const FLAG_HALT: u8 = 0x04;
const FLAG_SRAM: u8 = 0x08;

struct BlockHeader {
	id: [u8; 4],
	read_only: bool,
	offset: u16,
	n_bytes: u16,
	n_banks: u16,
	bank_select: u16,
}

impl BlockHeader {
	fn registers(id: &[u8; 4]) -> Self {
		Self {
			id: *id,
			read_only: false,
			offset: 0,
			n_bytes: 0,
			n_banks: 0,
			bank_select: 0,
		}
	}

	fn ram(id: &[u8; 4], offset: u16, n_bytes: u16, n_banks: u16, bank_select: u16) -> Self {
		Self {
			id: *id,
			read_only: false,
			offset,
			n_bytes,
			n_banks,
			bank_select,
		}
	}

	fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
		w.write_u32::<LittleEndian>(u32::from_le_bytes(self.id))?;
		w.write_u8(self.read_only as u8)?;
		w.write_u16::<LittleEndian>(self.offset)?;
		w.write_u16::<LittleEndian>(self.n_bytes)?;
		w.write_u16::<LittleEndian>(self.n_banks)?;
		w.write_u16::<LittleEndian>(self.bank_select)?;
		Ok(())
	}

	/// Read a header and compare it against the expected layout. Returns
	/// the stored bank select. Mismatches warn but do not abort.
	fn read_expected<R: Read>(&self, r: &mut R) -> io::Result<u16> {
		let id = r.read_u32::<LittleEndian>()?.to_le_bytes();
		let read_only = r.read_u8()? != 0;
		let offset = r.read_u16::<LittleEndian>()?;
		let n_bytes = r.read_u16::<LittleEndian>()?;
		let n_banks = r.read_u16::<LittleEndian>()?;
		let bank_select = r.read_u16::<LittleEndian>()?;
		if id != self.id
			|| read_only != self.read_only
			|| offset != self.offset
			|| n_bytes != self.n_bytes
			|| n_banks != self.n_banks
		{
			core_warn!(
				target: "savestate",
				"component header mismatch for {:?} (got {:?}); continuing, state may be unstable",
				String::from_utf8_lossy(&self.id),
				String::from_utf8_lossy(&id)
			);
		}
		Ok(bank_select)
	}
}

/// Serialize the complete core state.
pub fn save_state<W: Write>(cpu: &Cpu, bus: &mut Bus, w: &mut W) -> Result<(), SavestateError> {
	let mut flags = 0u8;
	if bus.is_cgb() {
		flags |= FLAG_CGB;
	}
	if cpu.stopped {
		flags |= FLAG_STOP;
	}
	if cpu.halted {
		flags |= FLAG_HALT;
	}
	let has_sram = bus.cart.as_ref().is_some_and(|c| !c.ram.is_empty());
	if has_sram {
		flags |= FLAG_SRAM;
	}

	w.write_u8(flags)?;
	w.write_u8(SAVESTATE_VERSION)?;
	let title = bus
		.cart
		.as_ref()
		.map(|c| *c.raw_title())
		.unwrap_or([0; 12]);
	w.write_all(&title)?;
	w.write_u8(bus.ie_reg)?;
	w.write_u8(cpu.ime as u8)?;

	if let (true, Some(cart)) = (has_sram, bus.cart.as_ref()) {
		sram_header(cart.ram.len()).write(w)?;
		w.write_all(&cart.ram)?;
	}

	write_sys_block(bus, w)?;
	write_cpu_block(cpu, w)?;
	write_timer_block(bus, w)?;
	write_serial_block(bus, w)?;
	write_joypad_block(bus, w)?;
	write_clock_block(bus, w)?;
	write_ppu_block(bus, w)?;
	write_oam_block(bus, w)?;
	write_apu_block(bus, w)?;
	write_dma_block(bus, w)?;
	write_wram_block(bus, w)?;
	write_hram_block(bus, w)?;
	write_cart_block(bus, w)?;

	// Observable I/O register page, one byte per FF00-FF7F slot.
	for i in 0..128u16 {
		let byte = bus.io_read(0xFF00 + i);
		w.write_u8(byte)?;
	}
	Ok(())
}

/// Restore the complete core state. A version or title mismatch logs a
/// warning and proceeds.
pub fn load_state<R: Read>(cpu: &mut Cpu, bus: &mut Bus, r: &mut R) -> Result<(), SavestateError> {
	let flags = r.read_u8()?;
	let version = r.read_u8()?;
	if version != SAVESTATE_VERSION {
		core_warn!(
			target: "savestate",
			"savestate version {version} != expected {SAVESTATE_VERSION}; continuing"
		);
	}
	let mut title = [0u8; 12];
	r.read_exact(&mut title)?;
	if let Some(cart) = bus.cart.as_ref()
		&& *cart.raw_title() != title
	{
		core_warn!(target: "savestate", "savestate title does not match the loaded cartridge");
	}
	if (flags & FLAG_CGB != 0) != bus.is_cgb() {
		core_warn!(target: "savestate", "savestate hardware model does not match this session");
	}
	cpu.stopped = flags & FLAG_STOP != 0;
	cpu.halted = flags & FLAG_HALT != 0;
	bus.ie_reg = r.read_u8()?;
	cpu.ime = r.read_u8()? != 0;

	if flags & FLAG_SRAM != 0 {
		let expected_len = bus.cart.as_ref().map(|c| c.ram.len()).unwrap_or(0);
		let bank_select = sram_header(expected_len).read_expected(r)?;
		let _ = bank_select;
		let mut ram = vec![0u8; expected_len];
		r.read_exact(&mut ram)?;
		if let Some(cart) = bus.cart.as_mut() {
			cart.load_sram(&ram);
		}
	}

	read_sys_block(bus, r)?;
	read_cpu_block(cpu, r)?;
	read_timer_block(bus, r)?;
	read_serial_block(bus, r)?;
	read_joypad_block(bus, r)?;
	read_clock_block(bus, r)?;
	read_ppu_block(bus, r)?;
	read_oam_block(bus, r)?;
	read_apu_block(bus, r)?;
	read_dma_block(bus, r)?;
	read_wram_block(bus, r)?;
	read_hram_block(bus, r)?;
	read_cart_block(bus, r)?;

	// Register page: canonical component state was restored above, so only
	// the plain storage slots are taken from the page.
	for i in 0..128u16 {
		let addr = 0xFF00 + i;
		let byte = r.read_u8()?;
		if bus.regs.descriptor(addr).owner == Owner::System {
			match addr {
				0xFF0F | 0xFF4D | 0xFF50 | 0xFF70 => {}
				_ => bus.regs.set_scratch_raw(addr, byte),
			}
		}
	}
	Ok(())
}

fn sram_header(len: usize) -> BlockHeader {
	let n_bytes = len.min(0x2000) as u16;
	let n_banks = if n_bytes == 0 {
		0
	} else {
		len.div_ceil(0x2000) as u16
	};
	BlockHeader::ram(b"SRAM", 0xA000, n_bytes, n_banks, 0)
}

fn write_sys_block<W: Write>(bus: &Bus, w: &mut W) -> io::Result<()> {
	BlockHeader::registers(b"SYS ").write(w)?;
	w.write_u8(bus.if_reg)?;
	w.write_u8(bus.key1)?;
	w.write_u8(bus.wram_bank as u8)?;
	w.write_u8(bus.boot_mapped as u8)
}

fn read_sys_block<R: Read>(bus: &mut Bus, r: &mut R) -> io::Result<()> {
	BlockHeader::registers(b"SYS ").read_expected(r)?;
	bus.if_reg = r.read_u8()?;
	bus.key1 = r.read_u8()?;
	bus.wram_bank = (r.read_u8()? as usize & 0x07).max(1);
	bus.boot_mapped = r.read_u8()? != 0;
	Ok(())
}

fn write_cpu_block<W: Write>(cpu: &Cpu, w: &mut W) -> io::Result<()> {
	BlockHeader::registers(b"CPU ").write(w)?;
	for reg in [cpu.a, cpu.f, cpu.b, cpu.c, cpu.d, cpu.e, cpu.h, cpu.l] {
		w.write_u8(reg)?;
	}
	w.write_u16::<LittleEndian>(cpu.sp)?;
	w.write_u16::<LittleEndian>(cpu.pc)?;
	w.write_u8(cpu.d8)?;
	w.write_u16::<LittleEndian>(cpu.d16)?;
	w.write_u16::<LittleEndian>(cpu.memory_address)?;
	w.write_u8(cpu.memory_value)?;
	w.write_u8(cpu.cycles_remaining)?;
	w.write_u8(cpu.ime_enable_delay)?;
	w.write_u8(cpu.halt_bug as u8)?;
	w.write_u8(cpu.locked as u8)?;
	w.write_u8(cpu.double_speed as u8)?;
	w.write_u32::<LittleEndian>(cpu.stop_countdown)?;
	w.write_u64::<LittleEndian>(cpu.cycles)?;
	w.write_u64::<LittleEndian>(cpu.retirements)
}

fn read_cpu_block<R: Read>(cpu: &mut Cpu, r: &mut R) -> io::Result<()> {
	BlockHeader::registers(b"CPU ").read_expected(r)?;
	cpu.a = r.read_u8()?;
	cpu.f = r.read_u8()? & 0xF0;
	cpu.b = r.read_u8()?;
	cpu.c = r.read_u8()?;
	cpu.d = r.read_u8()?;
	cpu.e = r.read_u8()?;
	cpu.h = r.read_u8()?;
	cpu.l = r.read_u8()?;
	cpu.sp = r.read_u16::<LittleEndian>()?;
	cpu.pc = r.read_u16::<LittleEndian>()?;
	cpu.d8 = r.read_u8()?;
	cpu.d16 = r.read_u16::<LittleEndian>()?;
	cpu.memory_address = r.read_u16::<LittleEndian>()?;
	cpu.memory_value = r.read_u8()?;
	cpu.cycles_remaining = r.read_u8()?;
	cpu.ime_enable_delay = r.read_u8()?;
	cpu.halt_bug = r.read_u8()? != 0;
	cpu.locked = r.read_u8()? != 0;
	cpu.double_speed = r.read_u8()? != 0;
	cpu.stop_countdown = r.read_u32::<LittleEndian>()?;
	cpu.cycles = r.read_u64::<LittleEndian>()?;
	cpu.retirements = r.read_u64::<LittleEndian>()?;
	Ok(())
}

fn write_timer_block<W: Write>(bus: &Bus, w: &mut W) -> io::Result<()> {
	BlockHeader::registers(b"TIME").write(w)?;
	w.write_u16::<LittleEndian>(bus.timer.div)?;
	w.write_u8(bus.timer.tima)?;
	w.write_u8(bus.timer.tma)?;
	w.write_u8(bus.timer.tac)?;
	w.write_u8(bus.timer.last_edge as u8)?;
	w.write_u8(bus.timer.pending_reload.is_some() as u8)?;
	w.write_u8(bus.timer.pending_reload.unwrap_or(0))
}

fn read_timer_block<R: Read>(bus: &mut Bus, r: &mut R) -> io::Result<()> {
	BlockHeader::registers(b"TIME").read_expected(r)?;
	bus.timer.div = r.read_u16::<LittleEndian>()?;
	bus.timer.tima = r.read_u8()?;
	bus.timer.tma = r.read_u8()?;
	bus.timer.tac = r.read_u8()? & 0x07;
	bus.timer.last_edge = r.read_u8()? != 0;
	let has_pending = r.read_u8()? != 0;
	let pending = r.read_u8()?;
	bus.timer.pending_reload = has_pending.then_some(pending);
	Ok(())
}

fn write_serial_block<W: Write>(bus: &Bus, w: &mut W) -> io::Result<()> {
	BlockHeader::registers(b"SERL").write(w)?;
	w.write_u8(bus.serial.sb)?;
	w.write_u8(bus.serial.sc)?;
	match &bus.serial.transfer {
		Some(t) => {
			w.write_u8(1)?;
			w.write_u8(t.remaining_bits)?;
			w.write_u8(t.outgoing)?;
			w.write_u8(t.internal_clock as u8)?;
			w.write_u8(t.fast_clock as u8)
		}
		None => {
			w.write_u8(0)?;
			w.write_all(&[0; 4])
		}
	}
}

fn read_serial_block<R: Read>(bus: &mut Bus, r: &mut R) -> io::Result<()> {
	BlockHeader::registers(b"SERL").read_expected(r)?;
	bus.serial.sb = r.read_u8()?;
	bus.serial.sc = r.read_u8()?;
	let active = r.read_u8()? != 0;
	let remaining_bits = r.read_u8()?;
	let outgoing = r.read_u8()?;
	let internal_clock = r.read_u8()? != 0;
	let fast_clock = r.read_u8()? != 0;
	bus.serial.transfer = active.then_some(crate::serial::Transfer {
		remaining_bits,
		outgoing,
		internal_clock,
		fast_clock,
	});
	Ok(())
}

fn write_joypad_block<W: Write>(bus: &Bus, w: &mut W) -> io::Result<()> {
	BlockHeader::registers(b"JOYP").write(w)?;
	w.write_u8(bus.joypad.select)?;
	w.write_u8(bus.joypad.directions)?;
	w.write_u8(bus.joypad.buttons)
}

fn read_joypad_block<R: Read>(bus: &mut Bus, r: &mut R) -> io::Result<()> {
	BlockHeader::registers(b"JOYP").read_expected(r)?;
	bus.joypad.select = r.read_u8()? & 0x30;
	bus.joypad.directions = r.read_u8()? & 0x0F;
	bus.joypad.buttons = r.read_u8()? & 0x0F;
	Ok(())
}

fn write_clock_block<W: Write>(bus: &Bus, w: &mut W) -> io::Result<()> {
	BlockHeader::registers(b"CLCK").write(w)?;
	let (cycles, ly, lyc, stat_enables, mode, frames) = bus.clock.snapshot();
	w.write_u16::<LittleEndian>(cycles)?;
	w.write_u8(ly)?;
	w.write_u8(lyc)?;
	w.write_u8(stat_enables)?;
	w.write_u8(mode)?;
	w.write_u64::<LittleEndian>(frames)
}

fn read_clock_block<R: Read>(bus: &mut Bus, r: &mut R) -> io::Result<()> {
	BlockHeader::registers(b"CLCK").read_expected(r)?;
	let cycles = r.read_u16::<LittleEndian>()?;
	let ly = r.read_u8()?;
	let lyc = r.read_u8()?;
	let stat_enables = r.read_u8()?;
	let mode = r.read_u8()?;
	let frames = r.read_u64::<LittleEndian>()?;
	bus.clock.restore(cycles, ly, lyc, stat_enables, mode, frames);
	Ok(())
}

fn ppu_header(bus: &Bus) -> BlockHeader {
	BlockHeader::ram(b"PPU ", 0x8000, 0x2000, 2, bus.ppu.vram_bank as u16)
}

fn write_ppu_block<W: Write>(bus: &Bus, w: &mut W) -> io::Result<()> {
	ppu_header(bus).write(w)?;
	let p = &bus.ppu;
	for reg in [p.lcdc, p.scy, p.scx, p.wy, p.wx, p.bgp, p.obp0, p.obp1] {
		w.write_u8(reg)?;
	}
	w.write_u8(p.bg_pal_index)?;
	w.write_u8(p.bg_pal_auto_inc as u8)?;
	w.write_u8(p.ob_pal_index)?;
	w.write_u8(p.ob_pal_auto_inc as u8)?;
	w.write_u8(p.window_line)?;
	w.write_all(&p.bg_pal_ram)?;
	w.write_all(&p.ob_pal_ram)?;
	w.write_all(&p.vram[0])?;
	w.write_all(&p.vram[1])
}

fn read_ppu_block<R: Read>(bus: &mut Bus, r: &mut R) -> io::Result<()> {
	let bank_select = ppu_header(bus).read_expected(r)?;
	let p = &mut bus.ppu;
	p.lcdc = r.read_u8()?;
	p.scy = r.read_u8()?;
	p.scx = r.read_u8()?;
	p.wy = r.read_u8()?;
	p.wx = r.read_u8()?;
	p.bgp = r.read_u8()?;
	p.obp0 = r.read_u8()?;
	p.obp1 = r.read_u8()?;
	p.bg_pal_index = r.read_u8()? & 0x3F;
	p.bg_pal_auto_inc = r.read_u8()? != 0;
	p.ob_pal_index = r.read_u8()? & 0x3F;
	p.ob_pal_auto_inc = r.read_u8()? != 0;
	p.window_line = r.read_u8()?;
	r.read_exact(&mut p.bg_pal_ram)?;
	r.read_exact(&mut p.ob_pal_ram)?;
	r.read_exact(&mut p.vram[0])?;
	r.read_exact(&mut p.vram[1])?;
	p.vram_bank = (bank_select & 0x01) as usize;
	Ok(())
}

fn write_oam_block<W: Write>(bus: &Bus, w: &mut W) -> io::Result<()> {
	BlockHeader::ram(b"OAM ", 0xFE00, 0xA0, 1, 0).write(w)?;
	w.write_all(&bus.ppu.oam)
}

fn read_oam_block<R: Read>(bus: &mut Bus, r: &mut R) -> io::Result<()> {
	BlockHeader::ram(b"OAM ", 0xFE00, 0xA0, 1, 0).read_expected(r)?;
	r.read_exact(&mut bus.ppu.oam)?;
	Ok(())
}

fn write_apu_block<W: Write>(bus: &mut Bus, w: &mut W) -> io::Result<()> {
	BlockHeader::registers(b"APU ").write(w)?;
	bus.apu.save_fields(w)
}

fn read_apu_block<R: Read>(bus: &mut Bus, r: &mut R) -> io::Result<()> {
	BlockHeader::registers(b"APU ").read_expected(r)?;
	bus.apu.load_fields(r)
}

fn write_dma_block<W: Write>(bus: &Bus, w: &mut W) -> io::Result<()> {
	BlockHeader::registers(b"DMA ").write(w)?;
	w.write_u8(bus.oam_dma.reg)?;
	w.write_u16::<LittleEndian>(bus.oam_dma.src)?;
	w.write_u8(bus.oam_dma.remaining)?;
	w.write_u16::<LittleEndian>(bus.vram_dma.src)?;
	w.write_u16::<LittleEndian>(bus.vram_dma.dst)?;
	w.write_u16::<LittleEndian>(bus.vram_dma.remaining)?;
	w.write_u8((bus.vram_dma.mode == VramDmaMode::HBlank) as u8)?;
	w.write_u8(bus.vram_dma.active as u8)
}

fn read_dma_block<R: Read>(bus: &mut Bus, r: &mut R) -> io::Result<()> {
	BlockHeader::registers(b"DMA ").read_expected(r)?;
	bus.oam_dma.reg = r.read_u8()?;
	bus.oam_dma.src = r.read_u16::<LittleEndian>()?;
	bus.oam_dma.remaining = r.read_u8()?;
	bus.vram_dma.src = r.read_u16::<LittleEndian>()?;
	bus.vram_dma.dst = r.read_u16::<LittleEndian>()?;
	bus.vram_dma.remaining = r.read_u16::<LittleEndian>()?;
	bus.vram_dma.mode = if r.read_u8()? != 0 {
		VramDmaMode::HBlank
	} else {
		VramDmaMode::General
	};
	bus.vram_dma.active = r.read_u8()? != 0;
	Ok(())
}

fn wram_header(bus: &Bus) -> BlockHeader {
	BlockHeader::ram(b"WRAM", 0xC000, 0x1000, 8, bus.wram_bank as u16)
}

fn write_wram_block<W: Write>(bus: &Bus, w: &mut W) -> io::Result<()> {
	wram_header(bus).write(w)?;
	for bank in &bus.wram {
		w.write_all(bank)?;
	}
	Ok(())
}

fn read_wram_block<R: Read>(bus: &mut Bus, r: &mut R) -> io::Result<()> {
	let bank_select = wram_header(bus).read_expected(r)?;
	for bank in &mut bus.wram {
		r.read_exact(bank)?;
	}
	bus.wram_bank = (bank_select as usize & 0x07).max(1);
	Ok(())
}

fn write_hram_block<W: Write>(bus: &Bus, w: &mut W) -> io::Result<()> {
	BlockHeader::ram(b"HRAM", 0xFF80, 0x7F, 1, 0).write(w)?;
	w.write_all(&bus.hram)
}

fn read_hram_block<R: Read>(bus: &mut Bus, r: &mut R) -> io::Result<()> {
	BlockHeader::ram(b"HRAM", 0xFF80, 0x7F, 1, 0).read_expected(r)?;
	r.read_exact(&mut bus.hram)?;
	Ok(())
}

fn write_cart_block<W: Write>(bus: &Bus, w: &mut W) -> io::Result<()> {
	BlockHeader::registers(b"CART").write(w)?;
	let (mapper, rtc, rtc_sub) = bus
		.cart
		.as_ref()
		.map(|c| c.mapper_snapshot())
		.unwrap_or(([0; 4], RtcRegisters::default(), 0));
	w.write_all(&mapper)?;
	w.write_u8(rtc.seconds)?;
	w.write_u8(rtc.minutes)?;
	w.write_u8(rtc.hours)?;
	w.write_u16::<LittleEndian>(rtc.days)?;
	w.write_u8((rtc.halt as u8) | ((rtc.carry as u8) << 1))?;
	w.write_u32::<LittleEndian>(rtc_sub)
}

fn read_cart_block<R: Read>(bus: &mut Bus, r: &mut R) -> io::Result<()> {
	BlockHeader::registers(b"CART").read_expected(r)?;
	let mut mapper = [0u8; 4];
	r.read_exact(&mut mapper)?;
	let rtc = RtcRegisters {
		seconds: r.read_u8()?,
		minutes: r.read_u8()?,
		hours: r.read_u8()?,
		days: r.read_u16::<LittleEndian>()?,
		halt: false,
		carry: false,
	};
	let flags = r.read_u8()?;
	let rtc = RtcRegisters {
		halt: flags & 0x01 != 0,
		carry: flags & 0x02 != 0,
		..rtc
	};
	let rtc_sub = r.read_u32::<LittleEndian>()?;
	if let Some(cart) = bus.cart.as_mut() {
		cart.restore_mapper(mapper, rtc, rtc_sub);
	}
	Ok(())
}
