//! Deterministic cycle-stepped emulation kernel for 8-bit Commodore machines.
//!
//! This crate contains the machine-agnostic pieces every emulated machine
//! shares: the clock and alarm scheduler, the event recorder/player, the
//! keyboard/joystick latches, the IEEE-488 parallel bus state machine and the
//! snapshot container format. The CPU and the machine's chips are consumed
//! through the [`machine::Machine`] trait, and frontends drive everything via
//! the [`emulator`] facade.

#![allow(dead_code)]

/// Emulated cycle counter and clock overflow guard.
pub mod clock;

/// CPU context: clock, interrupt status and pending reset.
pub mod cpu;

/// Datasette transport commands.
pub mod datasette;

/// High-level facade that wires a machine to the recorder and input latches.
pub mod emulator;

/// Event log types, the EVENT module codec and the recorder/player.
pub mod event;

/// Interrupt lines, alarm deadlines and stolen-cycle accounting.
pub mod interrupt;

/// Joystick port values and their alarm-delayed latch.
pub mod joystick;

/// Keyboard matrix and its alarm-delayed latch.
pub mod keyboard;

/// Collaborator trait for the emulated machine, plus a headless reference machine.
pub mod machine;

/// IEEE-488 parallel bus handshake state machine.
pub mod parallel;

/// Named, validated configuration values consumed by the kernel.
pub mod resources;

/// Versioned, module-chunked snapshot container.
pub mod snapshot;

/// User-facing notification hooks.
pub mod ui;
