use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Single-producer / single-consumer ring of stereo i16 frames.
///
/// The emulator thread produces, the host audio callback consumes. The ring
/// is lossy when full: the newest frame is dropped so the consumer never
/// observes a torn or reordered stream.
pub struct SampleProducer {
	shared: Arc<Shared>,
}

#[derive(Clone)]
pub struct SampleConsumer {
	shared: Arc<Shared>,
}

struct Shared {
	frames: Box<[UnsafeCell<MaybeUninit<[i16; 2]>>]>,
	/// Power-of-two capacity; indices wrap with `mask`.
	mask: usize,
	write_pos: AtomicUsize,
	read_pos: AtomicUsize,
}

// Only the producer writes `frames[write_pos]` and only the consumer reads
// `frames[read_pos]`; the positions are exchanged through atomics.
unsafe impl Sync for Shared {}

impl Shared {
	fn len(&self) -> usize {
		let w = self.write_pos.load(Ordering::Acquire);
		let r = self.read_pos.load(Ordering::Acquire);
		w.wrapping_sub(r)
	}
}

/// Create a sample ring holding at least `min_frames` stereo frames.
pub fn sample_ring(min_frames: usize) -> (SampleProducer, SampleConsumer) {
	let cap = min_frames.max(2).next_power_of_two();
	let mut frames = Vec::with_capacity(cap);
	for _ in 0..cap {
		frames.push(UnsafeCell::new(MaybeUninit::uninit()));
	}

	let shared = Arc::new(Shared {
		frames: frames.into_boxed_slice(),
		mask: cap - 1,
		write_pos: AtomicUsize::new(0),
		read_pos: AtomicUsize::new(0),
	});

	(
		SampleProducer {
			shared: Arc::clone(&shared),
		},
		SampleConsumer { shared },
	)
}

impl SampleProducer {
	/// Push one stereo frame. Returns false (dropping the frame) when full.
	#[inline]
	pub fn push(&self, left: i16, right: i16) -> bool {
		let w = self.shared.write_pos.load(Ordering::Relaxed);
		let r = self.shared.read_pos.load(Ordering::Acquire);
		if w.wrapping_sub(r) > self.shared.mask {
			return false;
		}

		unsafe {
			(*self.shared.frames[w & self.shared.mask].get()).write([left, right]);
		}
		self.shared.write_pos.store(w.wrapping_add(1), Ordering::Release);
		true
	}

	#[inline]
	pub fn len(&self) -> usize {
		self.shared.len()
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	#[inline]
	pub fn capacity(&self) -> usize {
		self.shared.mask + 1
	}
}

impl SampleConsumer {
	#[inline]
	pub fn pop(&self) -> Option<(i16, i16)> {
		let r = self.shared.read_pos.load(Ordering::Relaxed);
		let w = self.shared.write_pos.load(Ordering::Acquire);
		if r == w {
			return None;
		}

		let frame = unsafe { (*self.shared.frames[r & self.shared.mask].get()).assume_init_read() };
		self.shared.read_pos.store(r.wrapping_add(1), Ordering::Release);
		Some((frame[0], frame[1]))
	}

	#[inline]
	pub fn len(&self) -> usize {
		self.shared.len()
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	#[inline]
	pub fn capacity(&self) -> usize {
		self.shared.mask + 1
	}
}
