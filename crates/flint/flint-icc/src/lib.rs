mod broadcast;
mod deque;
mod ring;
mod seqlock;
pub mod shm;
mod spsc;
pub mod wait;

pub use broadcast::{BroadcastReader, BroadcastRing, BroadcastWriter};
pub use deque::{Steal, Stealer, Worker};
pub use ring::CachePadded;
pub use spsc::{Consumer, Producer, RingBuffer};
pub use wait::WaitStrategy;
