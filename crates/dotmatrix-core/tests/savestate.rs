mod common;

use common::{load_cart, load_program, run_cycles};
use dotmatrix_core::gameboy::GameBoy;

fn busy_machine(cgb: bool) -> GameBoy {
	let mut gb = GameBoy::new_with_mode(cgb);
	gb.load_cart(load_cart(0x03, 1, 0x02)); // MBC1+RAM+BATTERY
	// A little program that keeps registers and memory moving.
	load_program(
		&mut gb,
		&[
			0x3C, // INC A
			0x04, // INC B
			0xEA, 0x00, 0xC8, // LD (0xC800),A
			0x18, 0xF9, // JR -7
		],
	);
	gb.bus.io_write(0xFF07, 0x05); // timer running
	run_cycles(&mut gb, 10_000);
	gb
}

#[test]
fn quicksave_quickload_round_trips_bytes_exactly() {
	let mut gb = busy_machine(false);
	let mut first = Vec::new();
	gb.save_state(&mut first).unwrap();

	let mut restored = GameBoy::new_with_mode(false);
	restored.load_cart(load_cart(0x03, 1, 0x02));
	restored.load_state(&mut first.as_slice()).unwrap();

	let mut second = Vec::new();
	restored.save_state(&mut second).unwrap();
	assert_eq!(first, second);
}

#[test]
fn restored_machine_resumes_deterministically() {
	let mut gb = busy_machine(false);
	let mut state = Vec::new();
	gb.save_state(&mut state).unwrap();

	let mut restored = GameBoy::new_with_mode(false);
	restored.load_cart(load_cart(0x03, 1, 0x02));
	restored.load_state(&mut state.as_slice()).unwrap();

	// More than a full frame, so every visible line is re-rendered on both
	// machines before the framebuffers are compared.
	run_cycles(&mut gb, 80_000);
	run_cycles(&mut restored, 80_000);

	assert_eq!(gb.cpu.pc, restored.cpu.pc);
	assert_eq!(gb.cpu.a, restored.cpu.a);
	assert_eq!(gb.cpu.b, restored.cpu.b);
	assert_eq!(gb.cpu.cycles, restored.cpu.cycles);
	assert_eq!(gb.bus.read_byte(0xC800), restored.bus.read_byte(0xC800));
	assert_eq!(gb.bus.timer.div, restored.bus.timer.div);
	assert_eq!(gb.framebuffer()[..], restored.framebuffer()[..]);
}

#[test]
fn identical_runs_are_bit_identical() {
	let mut a = busy_machine(false);
	let mut b = busy_machine(false);
	run_cycles(&mut a, 100_000);
	run_cycles(&mut b, 100_000);

	assert_eq!(a.cpu.debug_state(), b.cpu.debug_state());
	assert_eq!(a.framebuffer()[..], b.framebuffer()[..]);

	let (mut sa, mut sb) = (Vec::new(), Vec::new());
	a.save_state(&mut sa).unwrap();
	b.save_state(&mut sb).unwrap();
	assert_eq!(sa, sb);
}

#[test]
fn quicksave_to_file_and_back() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("quick.state");

	let mut gb = busy_machine(true);
	gb.quicksave(&path).unwrap();

	let mut restored = GameBoy::new_with_mode(true);
	restored.load_cart(load_cart(0x03, 1, 0x02));
	restored.quickload(&path).unwrap();

	assert_eq!(gb.cpu.pc, restored.cpu.pc);
	assert_eq!(gb.bus.ppu.vram[0][..], restored.bus.ppu.vram[0][..]);
	for i in 0..128u16 {
		assert_eq!(
			gb.bus.io_read(0xFF00 + i),
			restored.bus.io_read(0xFF00 + i),
			"register 0xFF{i:02X}"
		);
	}
}

#[test]
fn version_mismatch_warns_but_loads() {
	let mut gb = busy_machine(false);
	let mut state = Vec::new();
	gb.save_state(&mut state).unwrap();
	state[1] = 0x7F; // clobber the version byte

	let mut restored = GameBoy::new_with_mode(false);
	restored.load_cart(load_cart(0x03, 1, 0x02));
	assert!(restored.load_state(&mut state.as_slice()).is_ok());
	assert_eq!(gb.cpu.pc, restored.cpu.pc);
}

#[test]
fn sram_file_round_trip() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("game.sram");

	let mut gb = GameBoy::new_with_mode(false);
	gb.load_cart(load_cart(0x03, 0, 0x02));
	gb.bus.write_byte(0x0000, 0x0A); // enable SRAM through the bus
	for i in 0..32u16 {
		gb.bus.write_byte(0xA000 + i, (i as u8).wrapping_mul(7));
	}
	gb.save_sram(&path).unwrap();

	let mut other = GameBoy::new_with_mode(false);
	other.load_cart(load_cart(0x03, 0, 0x02));
	other.load_sram(&path).unwrap();
	other.bus.write_byte(0x0000, 0x0A);
	for i in 0..32u16 {
		assert_eq!(other.bus.read_byte(0xA000 + i), (i as u8).wrapping_mul(7));
	}
}
