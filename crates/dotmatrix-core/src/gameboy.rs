use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;

use crate::audio_queue::{SampleConsumer, sample_ring};
use crate::bus::Bus;
use crate::cartridge::Cartridge;
use crate::config::Config;
use crate::cpu::Cpu;
use crate::diagnostics;
use crate::joypad::Button;
use crate::ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};
use crate::savestate::{self, SavestateError};

/// Safety bound for the run_until_* helpers: two full frames of master
/// cycles, so a stopped or wedged CPU cannot hang the host.
const RUN_GUARD_CYCLES: u32 = 456 * 154 * 2 * 2;

/// The assembled machine: CPU plus bus, driven one master cycle at a time.
pub struct GameBoy {
	pub cpu: Cpu,
	pub bus: Bus,
	cgb: bool,
	paused: bool,
	/// Write battery-backed SRAM to its file when the machine is dropped.
	auto_save: bool,
}

impl GameBoy {
	pub fn new() -> Self {
		Self::new_with_mode(false)
	}

	/// Post-boot machine for the selected hardware model.
	pub fn new_with_mode(cgb: bool) -> Self {
		Self {
			cpu: Cpu::new_with_mode(cgb),
			bus: Bus::new_with_mode(cgb),
			cgb,
			paused: false,
			auto_save: true,
		}
	}

	/// Power-on machine intended to execute a boot ROM from address 0.
	pub fn new_power_on(cgb: bool) -> Self {
		Self {
			cpu: Cpu::new_power_on(),
			bus: Bus::new_power_on(cgb),
			cgb,
			paused: false,
			auto_save: true,
		}
	}

	/// Build a machine for a cartridge, honoring its CGB support flag and
	/// the host's force-color preference.
	pub fn from_cartridge(cart: Cartridge, force_color: bool) -> Self {
		let cgb = cart.cgb || force_color;
		let mut gb = Self::new_with_mode(cgb);
		gb.bus.load_cart(cart);
		gb
	}

	/// Build a machine for a cartridge with the host configuration applied.
	/// FORCE_COLOR participates here because it selects the hardware model,
	/// which is fixed at construction.
	pub fn from_cartridge_with_config(cart: Cartridge, config: &Config) -> Self {
		let mut gb = Self::from_cartridge(cart, config.force_color);
		gb.apply_config(config);
		gb
	}

	#[inline]
	pub fn is_cgb(&self) -> bool {
		self.cgb
	}

	pub fn load_cart(&mut self, cart: Cartridge) {
		self.bus.load_cart(cart);
	}

	pub fn load_boot_rom(&mut self, data: Vec<u8>) {
		self.cpu = Cpu::new_power_on();
		self.bus.load_boot_rom(data);
	}

	/// Reset to the initial post-boot state, keeping the loaded cartridge
	/// and boot ROM.
	pub fn reset(&mut self) {
		let cart = self.bus.cart.take();
		let boot = self.bus.boot_rom.take();
		self.cpu = Cpu::new_with_mode(self.cgb);
		self.bus = Bus::new_with_mode(self.cgb);
		if let Some(cart) = cart {
			self.bus.load_cart(cart);
		}
		if let Some(boot) = boot {
			self.load_boot_rom(boot);
		}
	}

	pub fn pause(&mut self) {
		self.paused = true;
	}

	pub fn unpause(&mut self) {
		self.paused = false;
	}

	pub fn paused(&self) -> bool {
		self.paused
	}

	/// Advance the whole machine by one master cycle. Component order is
	/// fixed: timer, APU, serial, system clock (which drives the PPU), DMA
	/// engines, CPU. The joypad has no per-tick work — its interrupt is
	/// raised on the input edge in [`Self::set_button`]. The CPU-rate
	/// components run twice per tick in CGB double-speed mode; the PPU,
	/// APU and HBlank DMA do not.
	pub fn advance_cycle(&mut self) {
		let bus = &mut self.bus;
		let double_speed = bus.double_speed();
		let speed = if double_speed { 2u16 } else { 1 };
		// A plain STOP gates the LCD and APU; a speed-switch stall does not.
		let gated = self.cpu.stopped && !self.cpu.in_speed_switch();

		let prev_div = bus.timer.div;
		bus.timer.step(speed, &mut bus.if_reg);
		if !gated {
			bus.apu.step(1);
		}
		let curr_div = bus.timer.div;
		bus.serial
			.step(prev_div, curr_div, double_speed, &mut bus.if_reg);
		if let Some(cart) = bus.cart.as_mut() {
			cart.step_rtc(speed as u32);
		}
		if !gated {
			let events = bus.clock.tick(&mut bus.ppu, &mut bus.if_reg);
			if events.entered_hblank {
				bus.hdma_hblank_transfer();
			}
		}
		bus.vram_dma_step();
		bus.oam_dma_step(speed);

		for _ in 0..speed {
			self.cpu.advance(&mut self.bus);
		}
	}

	/// Run until the CPU retires one instruction (or interrupt dispatch)
	/// and its full cycle cost has elapsed.
	pub fn step(&mut self) {
		if self.paused {
			return;
		}
		let target = self.cpu.retirements + 1;
		let mut guard = 0u32;
		while (self.cpu.retirements < target || self.cpu.cycles_remaining > 0)
			&& guard < RUN_GUARD_CYCLES
		{
			self.advance_cycle();
			guard += 1;
			if self.cpu.locked {
				break;
			}
		}
	}

	/// Run until the next entry into HBlank (mode 0 on a visible line).
	pub fn run_until_hblank(&mut self) {
		if self.paused {
			return;
		}
		let mut guard = 0u32;
		while self.bus.clock.in_hblank() && guard < RUN_GUARD_CYCLES {
			self.advance_cycle();
			guard += 1;
		}
		while !self.bus.clock.in_hblank() && guard < RUN_GUARD_CYCLES {
			self.advance_cycle();
			guard += 1;
		}
	}

	/// Run until the next VBlank edge (one full frame).
	pub fn run_until_vblank(&mut self) {
		if self.paused {
			return;
		}
		let mut guard = 0u32;
		while guard < RUN_GUARD_CYCLES {
			self.advance_cycle();
			guard += 1;
			if self.bus.clock.poll_vsync() {
				break;
			}
		}
	}

	/// Poll the VSync rising-edge flag (returned once per frame).
	pub fn poll_vsync(&mut self) -> bool {
		self.bus.clock.poll_vsync()
	}

	/// Throttle to the nominal frame period since the last VSync.
	pub fn wait_next_vsync(&mut self) {
		self.bus.clock.wait_next_vsync();
	}

	pub fn set_framerate_multiplier(&mut self, mult: f32) {
		self.bus.clock.set_framerate_multiplier(mult);
	}

	pub fn set_audio_volume(&mut self, volume: f32) {
		self.bus.apu.set_volume(volume);
	}

	/// Create the host-facing audio stream. The returned consumer is the
	/// only shared-resource boundary of the core; pop it from the audio
	/// callback.
	pub fn attach_audio(&mut self, min_frames: usize) -> SampleConsumer {
		let (producer, consumer) = sample_ring(min_frames);
		self.bus.apu.connect_output(producer);
		consumer
	}

	/// The composited frame, one host color per pixel, row-major 160x144.
	pub fn framebuffer(&self) -> &[u32; SCREEN_WIDTH * SCREEN_HEIGHT] {
		self.bus.ppu.framebuffer()
	}

	/// Feed one host button edge into the joypad matrix.
	pub fn set_button(&mut self, button: Button, pressed: bool) {
		self.bus.joypad.set_button(button, pressed, &mut self.bus.if_reg);
	}

	/// Drain bytes the guest pushed out the serial port.
	pub fn take_serial(&mut self) -> Vec<u8> {
		self.bus.take_serial()
	}

	/// Force VRAM/OAM lockouts for debugging.
	pub fn lock_memory(&mut self, vram: bool, oam: bool) {
		self.bus.lock_memory(vram, oam);
	}

	pub fn quicksave<P: AsRef<Path>>(&mut self, path: P) -> Result<(), SavestateError> {
		let mut file = BufWriter::new(File::create(path)?);
		savestate::save_state(&self.cpu, &mut self.bus, &mut file)
	}

	pub fn quickload<P: AsRef<Path>>(&mut self, path: P) -> Result<(), SavestateError> {
		let mut file = BufReader::new(File::open(path)?);
		savestate::load_state(&mut self.cpu, &mut self.bus, &mut file)
	}

	/// Serialize the core state to an arbitrary writer.
	pub fn save_state<W: io::Write>(&mut self, w: &mut W) -> Result<(), SavestateError> {
		savestate::save_state(&self.cpu, &mut self.bus, w)
	}

	pub fn load_state<R: io::Read>(&mut self, r: &mut R) -> Result<(), SavestateError> {
		savestate::load_state(&mut self.cpu, &mut self.bus, r)
	}

	/// Battery-backed external RAM as a raw blob.
	pub fn sram(&self) -> Option<Vec<u8>> {
		self.bus.cart.as_ref().map(|c| c.save_sram())
	}

	pub fn load_sram_bytes(&mut self, bytes: &[u8]) {
		if let Some(cart) = self.bus.cart.as_mut() {
			cart.load_sram(bytes);
		}
	}

	pub fn save_sram<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
		match self.sram() {
			Some(ram) if !ram.is_empty() => std::fs::write(path, ram),
			_ => Ok(()),
		}
	}

	pub fn load_sram<P: AsRef<Path>>(&mut self, path: P) -> io::Result<()> {
		let bytes = std::fs::read(path)?;
		self.load_sram_bytes(&bytes);
		Ok(())
	}

	/// Whether SRAM is flushed to disk automatically when the machine is
	/// dropped.
	pub fn auto_save_enabled(&self) -> bool {
		self.auto_save
	}

	pub fn set_auto_save(&mut self, enabled: bool) {
		self.auto_save = enabled;
	}

	/// Apply the core-relevant configuration keys: MASTER_VOLUME,
	/// FRAMERATE_MULTIPLIER, VERBOSE_MODE and DISABLE_AUTO_SAVE.
	/// FORCE_COLOR is consumed by [`Self::from_cartridge_with_config`]
	/// since the hardware model cannot change on a live machine.
	pub fn apply_config(&mut self, config: &Config) {
		if let Some(volume) = config.master_volume {
			self.set_audio_volume(volume);
		}
		if let Some(mult) = config.framerate_multiplier {
			self.set_framerate_multiplier(mult);
		}
		diagnostics::set_verbose(config.verbose_mode);
		self.auto_save = !config.disable_auto_save;
	}
}

impl Drop for GameBoy {
	fn drop(&mut self) {
		if !self.auto_save {
			return;
		}
		if let Some(cart) = self.bus.cart.as_ref()
			&& let Err(err) = cart.save_sram_to_file()
		{
			core_warn!(target: "gameboy", "failed to auto-save SRAM: {err}");
		}
	}
}

impl Default for GameBoy {
	fn default() -> Self {
		Self::new()
	}
}
