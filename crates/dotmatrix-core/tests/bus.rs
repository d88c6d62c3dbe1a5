mod common;

use common::{build_rom, make_gb_frozen};
use dotmatrix_core::cartridge::Cartridge;
use dotmatrix_core::gameboy::GameBoy;

#[test]
fn boot_overlay_shadows_cartridge_until_disabled() {
	let mut gb = GameBoy::new_power_on(false);
	gb.load_cart(Cartridge::load(build_rom(0x00, 0, 0)).unwrap());
	let mut boot: Vec<u8> = (0..=0xFF).collect();
	boot[0] = 0x31;
	gb.load_boot_rom(boot);

	assert_eq!(gb.cpu.pc, 0);
	assert_eq!(gb.bus.read_byte(0x0000), 0x31);
	assert_eq!(gb.bus.read_byte(0x00FF), 0xFF);
	// Past the overlay window the cartridge is visible.
	assert_eq!(gb.bus.read_byte(0x0150), 0x00);

	// Any nonzero write to FF50 retires the overlay for the session.
	gb.bus.write_byte(0xFF50, 0x01);
	assert_eq!(gb.bus.read_byte(0x0000), 0x00); // cart bank 0 byte
	assert!(!gb.bus.boot_mapped);
	gb.bus.write_byte(0xFF50, 0x00);
	assert!(!gb.bus.boot_mapped);
}

#[test]
fn cgb_boot_overlay_covers_upper_window_but_not_header() {
	let mut gb = GameBoy::new_power_on(true);
	gb.load_cart(Cartridge::load(build_rom(0x00, 0, 0)).unwrap());
	let mut boot = vec![0xAA; 0x900];
	boot[0x0250] = 0xBB;
	gb.load_boot_rom(boot);

	assert_eq!(gb.bus.read_byte(0x0000), 0xAA);
	assert_eq!(gb.bus.read_byte(0x0250), 0xBB);
	// The cartridge header window stays visible during boot.
	assert_eq!(gb.bus.read_byte(0x0147), 0x00);
}

#[test]
fn echo_ram_aliases_wram() {
	let mut gb = make_gb_frozen(false);
	gb.bus.write_byte(0xC123, 0x42);
	assert_eq!(gb.bus.read_byte(0xE123), 0x42);
	gb.bus.write_byte(0xFDFF, 0x55);
	assert_eq!(gb.bus.read_byte(0xDDFF), 0x55);
}

#[test]
fn unusable_region_reads_zero_and_drops_writes() {
	let mut gb = make_gb_frozen(false);
	gb.bus.write_byte(0xFEA0, 0x99);
	assert_eq!(gb.bus.read_byte(0xFEA0), 0x00);
	assert_eq!(gb.bus.read_byte(0xFEFF), 0x00);
}

#[test]
fn unmapped_io_reads_open_bus() {
	let mut gb = make_gb_frozen(false);
	assert_eq!(gb.bus.read_byte(0xFF03), 0xFF);
	// CGB-only registers on a DMG machine.
	assert_eq!(gb.bus.read_byte(0xFF4D), 0xFF);
	assert_eq!(gb.bus.read_byte(0xFF70), 0xFF);
}

#[test]
fn cgb_wram_banking_via_svbk() {
	let mut gb = make_gb_frozen(true);
	gb.bus.io_write(0xFF70, 2);
	gb.bus.write_byte(0xD000, 0x22);
	gb.bus.io_write(0xFF70, 3);
	gb.bus.write_byte(0xD000, 0x33);

	gb.bus.io_write(0xFF70, 2);
	assert_eq!(gb.bus.read_byte(0xD000), 0x22);
	gb.bus.io_write(0xFF70, 3);
	assert_eq!(gb.bus.read_byte(0xD000), 0x33);

	// Bank 0 maps to bank 1.
	gb.bus.io_write(0xFF70, 0);
	gb.bus.write_byte(0xD000, 0x11);
	gb.bus.io_write(0xFF70, 1);
	assert_eq!(gb.bus.read_byte(0xD000), 0x11);
	assert_eq!(gb.bus.io_read(0xFF70) & 0x07, 1);
}

#[test]
fn cgb_vram_banking_via_vbk() {
	let mut gb = make_gb_frozen(true);
	// HBlank so VRAM is open.
	while !gb.bus.clock.in_hblank() {
		gb.advance_cycle();
	}
	gb.bus.io_write(0xFF4F, 1);
	gb.bus.write_byte(0x8000, 0xB1);
	gb.bus.io_write(0xFF4F, 0);
	gb.bus.write_byte(0x8000, 0xB0);

	assert_eq!(gb.bus.ppu.vram[0][0], 0xB0);
	assert_eq!(gb.bus.ppu.vram[1][0], 0xB1);
	gb.bus.io_write(0xFF4F, 1);
	assert_eq!(gb.bus.io_read(0xFF4F), 0xFF);
	gb.bus.io_write(0xFF4F, 0);
	assert_eq!(gb.bus.io_read(0xFF4F), 0xFE);
}

#[test]
fn key1_arms_and_stop_commits_speed_switch() {
	let mut gb = make_gb_frozen(true);
	gb.cpu.locked = false;
	assert_eq!(gb.bus.io_read(0xFF4D), 0x7E);
	gb.bus.io_write(0xFF4D, 0x01);
	assert_eq!(gb.bus.io_read(0xFF4D), 0x7F);

	// Run a STOP from WRAM.
	common::load_program(&mut gb, &[0x10, 0x00]);
	gb.advance_cycle();
	assert!(gb.bus.double_speed());
	assert!(gb.cpu.in_speed_switch());
	assert_eq!(gb.bus.io_read(0xFF4D), 0xFE);

	// The stall ends on its own and execution resumes.
	for _ in 0..10_000 {
		gb.advance_cycle();
	}
	assert!(!gb.cpu.stopped);
}

#[test]
fn plain_stop_parks_until_joypad_wake() {
	let mut gb = make_gb_frozen(false);
	gb.cpu.locked = false;
	common::load_program(&mut gb, &[0x10, 0x00, 0x04]); // STOP ; INC B
	for _ in 0..8 {
		gb.advance_cycle();
	}
	assert!(gb.cpu.stopped);

	for _ in 0..1000 {
		gb.advance_cycle();
	}
	assert!(gb.cpu.stopped);

	// A joypad edge wakes the machine.
	gb.bus.io_write(0xFF00, 0x20); // select directions
	gb.set_button(dotmatrix_core::joypad::Button::Down, true);
	gb.step();
	assert!(!gb.cpu.stopped);
	assert_eq!(gb.cpu.b, 1);
}

#[test]
fn ie_register_holds_all_bits() {
	let mut gb = make_gb_frozen(false);
	gb.bus.write_byte(0xFFFF, 0xAB);
	assert_eq!(gb.bus.read_byte(0xFFFF), 0xAB);
}

#[test]
fn if_reads_upper_bits_high() {
	let mut gb = make_gb_frozen(false);
	gb.bus.write_byte(0xFF0F, 0x00);
	assert_eq!(gb.bus.read_byte(0xFF0F), 0xE0);
	gb.bus.write_byte(0xFF0F, 0x1F);
	assert_eq!(gb.bus.read_byte(0xFF0F), 0xFF);
}

#[test]
fn cgb_scratch_registers_keep_their_masks() {
	let mut gb = make_gb_frozen(true);
	gb.bus.io_write(0xFF72, 0xAB);
	assert_eq!(gb.bus.io_read(0xFF72), 0xAB);
	// FF75 only implements bits 4-6.
	gb.bus.io_write(0xFF75, 0xFF);
	assert_eq!(gb.bus.io_read(0xFF75), 0x70);
}
