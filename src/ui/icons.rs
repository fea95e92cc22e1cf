//! Status glyphs for terminal output, with plain-text fallbacks.

use console::Emoji;
use truthcast_common::PhaseStatus;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static IDLE: Emoji<'_, '_> = Emoji("⏸️  ", "[ ]");
pub static STOP: Emoji<'_, '_> = Emoji("⏹️  ", "[X]");
pub static HALT: Emoji<'_, '_> = Emoji("🚧 ", "[HALT]");
pub static RECORD: Emoji<'_, '_> = Emoji("🗂️  ", "[REC]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");

pub fn status_icon(status: PhaseStatus) -> &'static Emoji<'static, 'static> {
    match status {
        PhaseStatus::Idle => &IDLE,
        PhaseStatus::Running => &RUNNING,
        PhaseStatus::Done => &CHECK,
        PhaseStatus::Failed => &CROSS,
        PhaseStatus::Canceled => &STOP,
    }
}
