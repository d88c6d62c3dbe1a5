mod common;

use common::{load_program, make_gb};

const FLAG_Z: u8 = 0x80;
const FLAG_N: u8 = 0x40;
const FLAG_H: u8 = 0x20;
const FLAG_C: u8 = 0x10;

#[test]
fn adc_with_carry_flags() {
	let mut gb = make_gb(false);
	load_program(&mut gb, &[0x88]); // ADC A,B
	gb.cpu.a = 0x3A;
	gb.cpu.b = 0xC6;
	gb.cpu.f = FLAG_C;
	gb.step();

	assert_eq!(gb.cpu.a, 0x01);
	assert_eq!(gb.cpu.f & FLAG_Z, 0);
	assert_eq!(gb.cpu.f & FLAG_N, 0);
	assert_ne!(gb.cpu.f & FLAG_H, 0);
	assert_ne!(gb.cpu.f & FLAG_C, 0);
}

#[test]
fn bit_on_hl_preserves_carry_and_operands() {
	let mut gb = make_gb(false);
	gb.bus.write_byte(0xC800, 0xEF);
	load_program(&mut gb, &[0xCB, 0x46]); // BIT 0,(HL)
	gb.cpu.set_hl(0xC800);
	gb.cpu.a = 0x5A;
	gb.cpu.f = FLAG_C;
	gb.step();

	assert_eq!(gb.cpu.f & FLAG_Z, 0); // bit 0 of 0xEF is set
	assert_eq!(gb.cpu.f & FLAG_N, 0);
	assert_ne!(gb.cpu.f & FLAG_H, 0);
	assert_ne!(gb.cpu.f & FLAG_C, 0);
	assert_eq!(gb.cpu.a, 0x5A);
	assert_eq!(gb.cpu.get_hl(), 0xC800);
	assert_eq!(gb.bus.read_byte(0xC800), 0xEF);
}

#[test]
fn register_swap_is_its_own_inverse() {
	let mut gb = make_gb(false);
	load_program(&mut gb, &[0x41, 0x48]); // LD B,C ; LD C,B
	gb.cpu.b = 0x12;
	gb.cpu.c = 0x34;
	let f_before = gb.cpu.f;
	gb.step();
	gb.step();

	assert_eq!(gb.cpu.b, 0x34);
	assert_eq!(gb.cpu.c, 0x34);
	assert_eq!(gb.cpu.f, f_before);
}

#[test]
fn xor_a_twice_still_zero_with_z_set() {
	let mut gb = make_gb(false);
	load_program(&mut gb, &[0xAF, 0xAF]);
	gb.cpu.a = 0x77;
	gb.step();
	assert_eq!(gb.cpu.a, 0);
	assert_eq!(gb.cpu.f, FLAG_Z);
	gb.step();
	assert_eq!(gb.cpu.a, 0);
	assert_eq!(gb.cpu.f, FLAG_Z);
}

#[test]
fn inc_dec_round_trip_preserves_value() {
	let mut gb = make_gb(false);
	load_program(&mut gb, &[0x04, 0x05]); // INC B ; DEC B
	gb.cpu.b = 0x42;
	gb.step();
	assert_eq!(gb.cpu.b, 0x43);
	gb.step();
	assert_eq!(gb.cpu.b, 0x42);
	assert_ne!(gb.cpu.f & FLAG_N, 0);
}

#[test]
fn push_pop_af_masks_low_flag_bits() {
	let mut gb = make_gb(false);
	load_program(&mut gb, &[0xF5, 0xF1]); // PUSH AF ; POP AF
	gb.cpu.sp = 0xDFF0;
	gb.cpu.a = 0x9C;
	gb.cpu.f = 0xB0;
	gb.step();
	gb.cpu.f = 0x00;
	gb.cpu.a = 0x00;
	gb.step();

	assert_eq!(gb.cpu.a, 0x9C);
	assert_eq!(gb.cpu.f, 0xB0);
	// F bits 0-3 can never hold data.
	assert_eq!(gb.cpu.f & 0x0F, 0);
}

#[test]
fn daa_adjusts_bcd_addition() {
	let mut gb = make_gb(false);
	// A = 0x45 + 0x38 = 0x7D, DAA -> 0x83.
	load_program(&mut gb, &[0x80, 0x27]); // ADD A,B ; DAA
	gb.cpu.a = 0x45;
	gb.cpu.b = 0x38;
	gb.step();
	gb.step();
	assert_eq!(gb.cpu.a, 0x83);
	assert_eq!(gb.cpu.f & FLAG_C, 0);

	// 0x99 + 0x01 rolls over to 0x00 with carry.
	let mut gb = make_gb(false);
	load_program(&mut gb, &[0x80, 0x27]);
	gb.cpu.a = 0x99;
	gb.cpu.b = 0x01;
	gb.step();
	gb.step();
	assert_eq!(gb.cpu.a, 0x00);
	assert_ne!(gb.cpu.f & FLAG_Z, 0);
	assert_ne!(gb.cpu.f & FLAG_C, 0);
}

#[test]
fn conditional_jr_charges_extra_cycles_when_taken() {
	let mut gb = make_gb(false);
	load_program(&mut gb, &[0x20, 0x02, 0x00, 0x00, 0x00]); // JR NZ,+2
	gb.cpu.f = 0;
	let start = gb.cpu.cycles;
	gb.step();
	assert_eq!(gb.cpu.pc, 0xC004);
	assert_eq!(gb.cpu.cycles - start, 12);

	let mut gb = make_gb(false);
	load_program(&mut gb, &[0x20, 0x02, 0x00, 0x00, 0x00]);
	gb.cpu.f = FLAG_Z;
	let start = gb.cpu.cycles;
	gb.step();
	assert_eq!(gb.cpu.pc, 0xC002);
	assert_eq!(gb.cpu.cycles - start, 8);
}

#[test]
fn call_and_ret_round_trip() {
	let mut gb = make_gb(false);
	// CALL 0xC010 ; (at 0xC010) RET
	load_program(&mut gb, &[0xCD, 0x10, 0xC0]);
	gb.bus.write_byte(0xC010, 0xC9);
	gb.cpu.sp = 0xDFF0;
	gb.step();
	assert_eq!(gb.cpu.pc, 0xC010);
	assert_eq!(gb.cpu.sp, 0xDFEE);
	gb.step();
	assert_eq!(gb.cpu.pc, 0xC003);
	assert_eq!(gb.cpu.sp, 0xDFF0);
}

#[test]
fn interrupt_dispatch_priority_and_acknowledge() {
	let mut gb = make_gb(false);
	load_program(&mut gb, &[0x00, 0x00]);
	gb.cpu.sp = 0xDFF0;
	gb.cpu.ime = true;
	gb.bus.ie_reg = 0x06; // STAT + timer enabled
	gb.bus.if_reg = 0x06; // both pending
	let start_cycles = gb.cpu.cycles;
	gb.step();

	// STAT (bit 1) outranks timer (bit 2).
	assert_eq!(gb.cpu.pc, 0x48);
	assert!(!gb.cpu.ime);
	assert_eq!(gb.bus.if_reg & 0x02, 0);
	assert_ne!(gb.bus.if_reg & 0x04, 0);
	assert_eq!(gb.cpu.cycles - start_cycles, 20);
}

#[test]
fn ei_takes_effect_after_following_instruction() {
	let mut gb = make_gb(false);
	load_program(&mut gb, &[0xFB, 0x00, 0x00]); // EI ; NOP ; NOP
	gb.cpu.sp = 0xDFF0;
	gb.bus.ie_reg = 0x01;
	gb.bus.if_reg = 0x01;
	gb.step();
	assert!(!gb.cpu.ime);
	assert_eq!(gb.cpu.pc, 0xC001);
	// The NOP after EI executes before dispatch.
	gb.step();
	assert_eq!(gb.cpu.pc, 0xC002);
	gb.step();
	assert_eq!(gb.cpu.pc, 0x40);
}

#[test]
fn halt_waits_for_pending_interrupt_without_ime() {
	let mut gb = make_gb(false);
	load_program(&mut gb, &[0x76, 0x04]); // HALT ; INC B
	gb.bus.ie_reg = 0x04;
	gb.step();
	assert!(gb.cpu.halted);

	// Run a while: still halted with nothing pending.
	for _ in 0..64 {
		gb.advance_cycle();
	}
	assert!(gb.cpu.halted);

	// Pending interrupt releases HALT even though IME is clear, and the
	// interrupt is not acknowledged.
	gb.bus.if_reg |= 0x04;
	gb.step();
	assert!(!gb.cpu.halted);
	assert_ne!(gb.bus.if_reg & 0x04, 0);
	assert_eq!(gb.cpu.b, 1);
}

#[test]
fn halt_bug_refetches_following_byte() {
	let mut gb = make_gb(false);
	load_program(&mut gb, &[0x76, 0x04, 0x00]); // HALT ; INC B
	gb.bus.ie_reg = 0x04;
	gb.bus.if_reg = 0x04; // pending at HALT time, IME clear
	gb.step();
	assert!(!gb.cpu.halted);

	// INC B runs twice: once from the stuck fetch, once normally.
	gb.step();
	assert_eq!(gb.cpu.b, 1);
	assert_eq!(gb.cpu.pc, 0xC001);
	gb.step();
	assert_eq!(gb.cpu.b, 2);
	assert_eq!(gb.cpu.pc, 0xC002);
}

#[test]
fn illegal_opcode_locks_the_cpu() {
	let mut gb = make_gb(false);
	load_program(&mut gb, &[0xD3]);
	gb.step();
	assert!(gb.cpu.locked);
	let pc = gb.cpu.pc;
	let retirements = gb.cpu.retirements;
	for _ in 0..32 {
		gb.advance_cycle();
	}
	assert_eq!(gb.cpu.pc, pc);
	assert_eq!(gb.cpu.retirements, retirements);
}

#[test]
fn ld_hl_sp_plus_offset_flags_from_low_byte() {
	let mut gb = make_gb(false);
	load_program(&mut gb, &[0xF8, 0x02]); // LD HL,SP+2
	gb.cpu.sp = 0xFFFE;
	gb.step();
	assert_eq!(gb.cpu.get_hl(), 0x0000);
	assert_ne!(gb.cpu.f & FLAG_C, 0);
	assert_ne!(gb.cpu.f & FLAG_H, 0);
	assert_eq!(gb.cpu.f & (FLAG_Z | FLAG_N), 0);
}

#[test]
fn memory_transients_track_last_access() {
	let mut gb = make_gb(false);
	load_program(&mut gb, &[0xEA, 0x34, 0xC8]); // LD (0xC834),A
	gb.cpu.a = 0x77;
	gb.step();
	assert_eq!(gb.cpu.d16, 0xC834);
	assert_eq!(gb.cpu.memory_address, 0xC834);
	assert_eq!(gb.cpu.memory_value, 0x77);
	assert_eq!(gb.bus.read_byte(0xC834), 0x77);
}

#[test]
fn rotates_through_carry() {
	let mut gb = make_gb(false);
	load_program(&mut gb, &[0x17, 0x1F]); // RLA ; RRA
	gb.cpu.a = 0x80;
	gb.cpu.f = 0;
	gb.step();
	// 0x80 rotated left through a clear carry: A=0, C=1, Z cleared.
	assert_eq!(gb.cpu.a, 0x00);
	assert_eq!(gb.cpu.f, FLAG_C);
	gb.step();
	assert_eq!(gb.cpu.a, 0x80);
	assert_eq!(gb.cpu.f, 0);
}

#[test]
fn cb_swap_nibbles() {
	let mut gb = make_gb(false);
	load_program(&mut gb, &[0xCB, 0x37]); // SWAP A
	gb.cpu.a = 0xF1;
	gb.step();
	assert_eq!(gb.cpu.a, 0x1F);
	assert_eq!(gb.cpu.f, 0);
}
