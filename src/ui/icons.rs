//! Status glyphs with plain-text fallbacks for dumb terminals.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[WARN]");
pub static IDLE: Emoji<'_, '_> = Emoji("💤 ", "[IDLE]");
pub static FLAG: Emoji<'_, '_> = Emoji("🏁 ", "[END]");
pub static PAUSE: Emoji<'_, '_> = Emoji("⏸️  ", "[PAUSE]");
pub static CYCLE: Emoji<'_, '_> = Emoji("🔄 ", "[CYCLE]");
