//! End-to-end generation runs

use netforge::artifacts::{DocumentState, RunSummary};
use netforge::model::ModelIntegrityError;
use netforge::plugins::DIAGNOSTICS_FILE;
use netforge::prelude::*;
use netforge::{placement_file_name, Net, NetClass, Pin, PinDirection, PinType, PlacementTable, Schematic, Sheet, Symbol};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn stamp() -> Provenance {
    Provenance::fixed("0.1.0", "4f2c9e1", "2026-03-01T12:00:00Z")
}

fn options(out: &Path) -> RunOptions {
    let mut options = RunOptions::new(out, stamp());
    options.external = false;
    options
}

/// Every file in `dir`, sorted, with its contents.
fn snapshot(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<(String, Vec<u8>)> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.is_file())
        .map(|p| (p.file_name().unwrap().to_string_lossy().into_owned(), fs::read(&p).unwrap()))
        .collect();
    files.sort();
    files
}

/// Root with a connector and one regulator sheet; the pull-up value is configurable.
fn regulator_board(pullup: &str, with_footprints: bool) -> HierarchicalSchematic {
    let fp = |s: Symbol, footprint: &str| if with_footprints { s.with_footprint(footprint) } else { s };

    let mut power = Schematic::new("power");
    power.add_port("5V_IN", PinDirection::Input);
    power.add_symbol(fp(
        Symbol::new("U1", "Regulator_Linear:AMS1117-3.3", "AMS1117-3.3")
            .with_pin(Pin::new("1", "GND", PinType::PowerIn))
            .with_pin(Pin::new("2", "VOUT", PinType::PowerOut))
            .with_pin(Pin::new("3", "VIN", PinType::PowerIn)),
        "Package_TO_SOT_SMD:SOT-223-3_TabPin2",
    ));
    power.add_symbol(fp(
        Symbol::new("C1", "Device:C", "100nF")
            .with_pin(Pin::new("1", "~", PinType::Passive))
            .with_pin(Pin::new("2", "~", PinType::Passive)),
        "Capacitor_SMD:C_0402_1005Metric",
    ));
    power.add_net(Net::new("5V_IN").with_class(NetClass::Power).connect("U1", "3").connect("C1", "1"));
    power.add_net(Net::new("GND").global().connect("U1", "1").connect("C1", "2"));
    power.add_net(Net::new("+3V3").with_class(NetClass::Power).global().connect("U1", "2"));

    let mut design = HierarchicalSchematic::new("regulator");
    design.root.add_symbol(
        Symbol::new("J1", "Connector:Conn_01x04", "I2C")
            .with_footprint("Connector_PinHeader_2.54mm:PinHeader_1x04_P2.54mm_Vertical")
            .with_pin(Pin::new("1", "VBUS", PinType::PowerOut))
            .with_pin(Pin::new("2", "GND", PinType::Passive))
            .with_pin(Pin::new("3", "SDA", PinType::Bidirectional)),
    );
    design.root.add_symbol(
        Symbol::new("R1", "Device:R", pullup)
            .with_footprint("Resistor_SMD:R_0402_1005Metric")
            .with_pin(Pin::new("1", "~", PinType::Passive))
            .with_pin(Pin::new("2", "~", PinType::Passive)),
    );
    design.root.add_sheet(
        Sheet::new("power", "power.kicad_sch", power).with_pin("5V_IN", PinDirection::Input),
    );
    design.root.add_net(
        Net::new("VCC_5V")
            .with_class(NetClass::Power)
            .connect("J1", "1")
            .attach_sheet_pin("power", "5V_IN"),
    );
    design.root.add_net(Net::new("GND").global().connect("J1", "2"));
    design.root.add_net(Net::new("SDA").with_class(NetClass::OpenDrain).connect("J1", "3").connect("R1", "1"));
    design.root.add_net(Net::new("+3V3").with_class(NetClass::Power).global().connect("R1", "2"));
    design
}

/// Configuration for the `design_file` generator pointing at `design` written into `dir`.
fn design_config(dir: &Path, design: &HierarchicalSchematic) -> GeneratorConfig {
    let path = dir.join("design.json");
    fs::write(&path, serde_json::to_string_pretty(design).unwrap()).unwrap();

    let mut config = GeneratorConfig::default();
    config.project.name = design.title.clone();
    config.project.generator = "design_file".to_string();
    config.project.design = Some(path);
    config.placement_classes.clear();
    config
}

#[test]
fn test_fixture_config_generates() {
    let config = GeneratorConfig::load(&fixture_path("touch_grid.json")).unwrap();
    let out = TempDir::new().unwrap();
    let outcome = NetforgeCore::generate(&config, &options(out.path())).unwrap();

    assert!(outcome.accepted(), "{:#?}", outcome.summary.findings);
    assert_eq!(outcome.summary.counts.error, 0);
    for name in [
        "touch_board.kicad_sch",
        "power.kicad_sch",
        "mcu.kicad_sch",
        "touch.kicad_sch",
        "led.kicad_sch",
        "touch_board.bom.csv",
        "touch_board.placement.csv",
        "touch_board.summary.json",
    ] {
        assert!(out.path().join(name).is_file(), "missing {}", name);
    }

    let summary = RunSummary::read(&outcome.summary_path).unwrap();
    assert!(summary.accepted);
    assert!(summary.references.contains(&"TP6".to_string()));
    assert!(summary.references.contains(&"LED24".to_string()));
    assert_eq!(summary.placement.map(|p| p.placed), Some(6 + 24));
    assert!(summary.documents.iter().all(|d| d.status == DocumentState::Written));
}

#[test]
fn test_identical_runs_are_byte_identical() {
    let config = GeneratorConfig::load(&fixture_path("touch_grid.json")).unwrap();
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    NetforgeCore::generate(&config, &options(first.path())).unwrap();
    NetforgeCore::generate(&config, &options(second.path())).unwrap();

    let a = snapshot(first.path());
    let b = snapshot(second.path());
    assert!(!a.is_empty());
    assert_eq!(a.len(), b.len());
    for ((name_a, bytes_a), (name_b, bytes_b)) in a.iter().zip(b.iter()) {
        assert_eq!(name_a, name_b);
        assert!(bytes_a == bytes_b, "{} differs between runs", name_a);
    }
}

#[test]
fn test_rerun_in_place_is_stable() {
    let config = GeneratorConfig::load(&fixture_path("touch_grid.json")).unwrap();
    let out = TempDir::new().unwrap();
    NetforgeCore::generate(&config, &options(out.path())).unwrap();
    let before = snapshot(out.path());
    NetforgeCore::generate(&config, &options(out.path())).unwrap();
    assert_eq!(before, snapshot(out.path()));
}

#[test]
fn test_error_findings_block_publication() {
    let work = TempDir::new().unwrap();
    let config = design_config(work.path(), &regulator_board("47k", true));
    let out = TempDir::new().unwrap();

    let outcome = NetforgeCore::generate(&config, &options(out.path())).unwrap();
    assert!(!outcome.accepted());
    assert!(outcome.published.is_empty());
    assert!(!out.path().join("regulator.kicad_sch").exists());
    assert!(!out.path().join("regulator.bom.csv").exists());

    let summary = RunSummary::read(&out.path().join("regulator.summary.json")).unwrap();
    assert!(summary.counts.error >= 1);
    assert!(summary.documents.iter().all(|d| d.status == DocumentState::Skipped));
}

#[test]
fn test_clean_design_file_is_published() {
    let work = TempDir::new().unwrap();
    let config = design_config(work.path(), &regulator_board("4.7k", true));
    let out = TempDir::new().unwrap();

    let outcome = NetforgeCore::generate(&config, &options(out.path())).unwrap();
    assert!(outcome.accepted(), "{:#?}", outcome.summary.findings);
    let root = fs::read_to_string(out.path().join("regulator.kicad_sch")).unwrap();
    assert!(root.starts_with("(kicad_sch"));
    assert!(root.contains("power.kicad_sch"));
    assert!(out.path().join("power.kicad_sch").is_file());
    assert!(out.path().join("power.kicad_sch.txt").is_file());
    assert!(!out.path().join(placement_file_name("regulator")).exists());
}

#[test]
fn test_failed_sibling_does_not_block_others() {
    let work = TempDir::new().unwrap();
    let config = design_config(work.path(), &regulator_board("4.7k", false));
    let out = TempDir::new().unwrap();

    let outcome = NetforgeCore::generate(&config, &options(out.path())).unwrap();
    assert!(!outcome.accepted());
    assert!(out.path().join("regulator.kicad_sch").is_file());
    assert!(!out.path().join("power.kicad_sch").exists());

    let power = outcome
        .summary
        .documents
        .iter()
        .find(|d| d.path == "power.kicad_sch")
        .unwrap();
    assert_eq!(power.status, DocumentState::Failed);
    assert!(power.error.as_deref().unwrap_or("").contains("footprint"));
}

#[test]
fn test_unresolved_hierarchy_is_fatal() {
    let work = TempDir::new().unwrap();
    let mut design = regulator_board("4.7k", true);
    design.root.sheets[0].schematic.ports[0].name = "5V".to_string();
    let config = design_config(work.path(), &design);
    let out = TempDir::new().unwrap();

    let err = NetforgeCore::generate(&config, &options(out.path())).err().unwrap();
    assert!(matches!(err, NetforgeError::Model(_)));

    let summary = RunSummary::read(&out.path().join("regulator.summary.json")).unwrap();
    assert!(!summary.accepted);
    assert!(summary.fatal.is_some());
    assert_eq!(summary.findings.len(), 1);
    assert_eq!(summary.counts.error, 1);
}

#[test]
fn test_sheet_file_outside_output_is_rejected() {
    let work = TempDir::new().unwrap();
    let mut design = regulator_board("4.7k", true);
    design.root.sheets[0].file = "../escaped.kicad_sch".to_string();
    let config = design_config(work.path(), &design);
    let root = TempDir::new().unwrap();
    let out = root.path().join("out");

    let err = NetforgeCore::generate(&config, &options(&out)).err().unwrap();
    assert!(matches!(err, NetforgeError::Model(ModelIntegrityError::UnsafeFilePath { .. })));
    assert!(!root.path().join("escaped.kicad_sch").exists());
    assert!(!out.join("regulator.kicad_sch").exists());

    let summary = RunSummary::read(&out.join("regulator.summary.json")).unwrap();
    assert!(!summary.accepted);
    assert!(summary.fatal.unwrap().contains("../escaped.kicad_sch"));
}

#[test]
fn test_project_name_outside_output_is_rejected() {
    let mut config = GeneratorConfig::load(&fixture_path("touch_grid.json")).unwrap();
    config.project.name = "../evil".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_locked_placement_survives_regeneration() {
    let config = GeneratorConfig::load(&fixture_path("touch_grid.json")).unwrap();
    let out = TempDir::new().unwrap();
    NetforgeCore::generate(&config, &options(out.path())).unwrap();

    let table_path = out.path().join(placement_file_name("touch_board"));
    let mut table = PlacementTable::read(&table_path).unwrap();
    assert!(table.rows().iter().all(|r| !r.locked));
    table.set_position("TP1", 100.0, 100.0).unwrap();
    table.write(&table_path).unwrap();

    NetforgeCore::generate(&config, &options(out.path())).unwrap();
    let table = PlacementTable::read(&table_path).unwrap();
    let tp1 = table.get("TP1").unwrap();
    assert_eq!((tp1.x_mm, tp1.y_mm, tp1.locked), (100.0, 100.0, true));
    let tp2 = table.get("TP2").unwrap();
    assert_eq!((tp2.x_mm, tp2.y_mm, tp2.locked), (20.0, 0.0, false));
}

#[test]
fn test_accept_locks_every_row() {
    let config = GeneratorConfig::load(&fixture_path("touch_grid.json")).unwrap();
    let out = TempDir::new().unwrap();
    let mut opts = options(out.path());
    opts.accept_placement = true;
    let outcome = NetforgeCore::generate(&config, &opts).unwrap();
    assert_eq!(outcome.summary.placement.map(|p| p.locked), Some(30));

    let table = PlacementTable::read(&out.path().join(placement_file_name("touch_board"))).unwrap();
    assert!(table.rows().iter().all(|r| r.locked));
}

#[test]
fn test_plugin_failures_are_collected() {
    let config = GeneratorConfig::load(&fixture_path("with_plugins.json")).unwrap();
    let out = TempDir::new().unwrap();
    let outcome = NetforgeCore::generate(&config, &options(out.path())).unwrap();

    assert_eq!(outcome.plugin_failures.len(), 1);
    assert_eq!(outcome.plugin_failures[0].kind, "unknown_factory");
    assert!(outcome.plugin_failures[0].path.ends_with("#plugins[2]"));
    assert_eq!(outcome.summary.plugin_failures, 1);
    assert_eq!(outcome.summary.generator, "touch_only");
    assert!(out.path().join(DIAGNOSTICS_FILE).is_file());
    assert!(!out.path().join("led.kicad_sch").exists());
    assert!(outcome
        .summary
        .findings
        .iter()
        .any(|f| f.rule_id == "decoupling_1u"));
}
