use std::io::Write;
use std::path::Path;

use cbm_emu_core::event::{EventError, EventList};
use cbm_emu_core::snapshot::Snapshot;

use crate::CliError;

/// Print the header, module table and decoded EVENT list of a snapshot.
pub fn inspect<W: Write>(path: &Path, out: &mut W) -> Result<(), CliError> {
    let snapshot = Snapshot::open(path)?;

    writeln!(out, "{}", path.display())?;
    writeln!(
        out,
        "  format {}.{}, machine {}",
        snapshot.major(),
        snapshot.minor(),
        snapshot.machine_name()
    )?;
    if let Some(v) = snapshot.tool_version() {
        writeln!(
            out,
            "  written by version {}.{}.{}.{} r{}",
            v.major, v.minor, v.micro, v.patch, v.revision
        )?;
    }

    writeln!(out, "modules:")?;
    for module in snapshot.modules()? {
        writeln!(
            out,
            "  {:<16} {}.{} {:>8} bytes",
            module.name, module.major, module.minor, module.size
        )?;
    }

    match EventList::read_module(&snapshot) {
        Ok(list) => {
            writeln!(
                out,
                "events: {} ({} s)",
                list.len(),
                list.timestamp_count()
            )?;
            for event in list.iter() {
                writeln!(out, "  {event}")?;
            }
        }
        Err(EventError::EventSectionMissing) => writeln!(out, "events: none")?,
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbm_emu_core::emulator::Emulator;
    use cbm_emu_core::machine::HeadlessMachine;
    use cbm_emu_core::resources::Resources;
    use cbm_emu_core::ui::CollectingUi;

    fn inspect_to_string(path: &Path) -> String {
        let mut out = Vec::new();
        inspect(path, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn plain_snapshot_lists_modules_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.vsf");
        let emu = Emulator::new(HeadlessMachine::new(), Resources::default());
        emu.save_snapshot(&path).unwrap();

        let text = inspect_to_string(&path);
        assert!(text.contains("machine C64"));
        assert!(text.contains("modules:"));
        assert!(text.contains("events: none"));
    }

    #[test]
    fn recording_shows_its_events() {
        let dir = tempfile::tempdir().unwrap();
        let resources = Resources {
            event_snapshot_dir: dir.path().to_string_lossy().into_owned(),
            ..Resources::default()
        };
        let end = resources.event_end_snapshot_path();
        let mut emu = Emulator::with_ui(HeadlessMachine::new(), resources, CollectingUi::default());

        emu.record_start().unwrap();
        emu.run_frame();
        emu.set_restore(true);
        for _ in 0..60 {
            emu.run_frame();
        }
        emu.record_stop().unwrap();

        let text = inspect_to_string(&end);
        assert!(text.contains("EVENT"));
        assert!(text.contains("INITIAL"));
        assert!(text.contains("KEYBOARD_RESTORE pressed=true"));
        assert!(text.contains("TIMESTAMP"));
        assert!(text.lines().last().unwrap().contains("LIST_END"));
    }

    #[test]
    fn garbage_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.vsf");
        std::fs::write(&path, b"definitely not a snapshot").unwrap();
        let err = inspect(&path, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, CliError::Snapshot(_)));
    }
}
