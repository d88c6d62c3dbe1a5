mod common;

use common::{make_gb_frozen, run_cycles};

#[test]
fn tima_overflow_reads_zero_for_one_cycle_then_reloads() {
	let mut gb = make_gb_frozen(false);
	gb.bus.io_write(0xFF04, 0); // reset DIV so edges are phase-aligned
	gb.bus.io_write(0xFF07, 0x05); // enabled, 262144 Hz
	gb.bus.io_write(0xFF05, 0xFF);
	gb.bus.io_write(0xFF06, 0x42);

	// The selected divider bit falls 16 cycles after the reset.
	run_cycles(&mut gb, 16);
	assert_eq!(gb.bus.io_read(0xFF05), 0x00);
	assert_eq!(gb.bus.if_reg & 0x04, 0);

	run_cycles(&mut gb, 1);
	assert_eq!(gb.bus.io_read(0xFF05), 0x42);
	assert_ne!(gb.bus.if_reg & 0x04, 0);
}

#[test]
fn div_increments_at_16384_hz_and_resets_on_write() {
	let mut gb = make_gb_frozen(false);
	gb.bus.io_write(0xFF04, 0x55);
	assert_eq!(gb.bus.io_read(0xFF04), 0);

	run_cycles(&mut gb, 256);
	assert_eq!(gb.bus.io_read(0xFF04), 1);
	run_cycles(&mut gb, 256 * 3);
	assert_eq!(gb.bus.io_read(0xFF04), 4);
}

#[test]
fn tima_rates_follow_tac_select() {
	for (tac, period) in [(0x04u8, 1024u32), (0x05, 16), (0x06, 64), (0x07, 256)] {
		let mut gb = make_gb_frozen(false);
		gb.bus.io_write(0xFF04, 0);
		gb.bus.io_write(0xFF07, tac);
		gb.bus.io_write(0xFF05, 0);

		run_cycles(&mut gb, period * 4);
		assert_eq!(gb.bus.io_read(0xFF05), 4, "TAC={tac:#04X}");
	}
}

#[test]
fn tima_does_not_tick_while_disabled() {
	let mut gb = make_gb_frozen(false);
	gb.bus.io_write(0xFF04, 0);
	gb.bus.io_write(0xFF07, 0x01); // fastest rate but disabled
	run_cycles(&mut gb, 4096);
	assert_eq!(gb.bus.io_read(0xFF05), 0);
}

#[test]
fn tima_write_during_overflow_gap_cancels_reload() {
	let mut gb = make_gb_frozen(false);
	gb.bus.io_write(0xFF04, 0);
	gb.bus.io_write(0xFF07, 0x05);
	gb.bus.io_write(0xFF05, 0xFF);
	gb.bus.io_write(0xFF06, 0x42);

	run_cycles(&mut gb, 16);
	assert_eq!(gb.bus.io_read(0xFF05), 0x00);
	gb.bus.io_write(0xFF05, 0x80);
	run_cycles(&mut gb, 1);
	assert_eq!(gb.bus.io_read(0xFF05), 0x80);
	assert_eq!(gb.bus.if_reg & 0x04, 0);
}

#[test]
fn tac_reads_unused_bits_high() {
	let mut gb = make_gb_frozen(false);
	gb.bus.io_write(0xFF07, 0x05);
	assert_eq!(gb.bus.io_read(0xFF07), 0xFD);
}
