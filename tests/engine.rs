use maskcheck::config::{self, Layout};
use maskcheck::engine::{CollisionKind, Device, DiagnosticKind, Leak, MemKey};
use maskcheck::parser;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_temp(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn run_files(asm: &str, layout: &str) -> (Device, maskcheck::engine::RunReport) {
    let asm_file = write_temp(asm);
    let layout_file = write_temp(layout);

    let program = parser::load_program(asm_file.path()).unwrap();
    let layout = config::load_layout(layout_file.path()).unwrap();

    let mut device = Device::default();
    device.load(program, &layout);
    let report = device.run();
    (device, report)
}

#[test]
fn unmasking_is_detected_when_both_shares_meet() {
    let program = parser::parse_program("eor r1, r2\neor r0, r1\n").unwrap();

    let mut device = Device::default();
    let _ = device.register_mut(0).set_random(Some("r0"));
    let _ = device.register_mut(1).load_mask("a", 0);
    let _ = device.register_mut(2).load_mask("a", 1);

    device.load(program, &Layout::default());
    let report = device.run();

    // the collision fires exactly once, at the instruction where the two
    // shares of mask a meet in one cell
    assert_eq!(report.leak_count(), 1, "{:?}", report.diagnostics);
    let diagnostic = &report.diagnostics[0];
    assert_eq!(diagnostic.pc, 0);
    assert_eq!(diagnostic.source, "eor r1, r2");
    match &diagnostic.kind {
        DiagnosticKind::Leak(Leak::Mask(collision)) => {
            assert_eq!(collision.mask, "a");
            assert_eq!(collision.kind, CollisionKind::DistinctShares);
            assert_eq!(
                collision.shares.iter().copied().collect::<Vec<_>>(),
                vec![0, 1]
            );
        }
        other => panic!("expected a mask collision, got {:?}", other),
    }

    // the unmasked union then flows on into r0 without further findings
    let r1_shares = device.register(1).mask_shares().get("a").unwrap();
    assert_eq!(r1_shares.iter().copied().collect::<Vec<_>>(), vec![0, 1]);
    assert!(device.register(0).is_random());
    let r0_shares = device.register(0).mask_shares().get("a").unwrap();
    assert_eq!(r0_shares.iter().copied().collect::<Vec<_>>(), vec![0, 1]);
}

#[test]
fn layout_seeded_shares_collide_through_memory() {
    let (device, report) = run_files(
        "lds r5, in0\nlds r6, in1\neor r5, r6\nsts out0, r5\n",
        r#"{
            "random": ["rand0"],
            "masks": [
                {"cell": "in0", "mask": "a", "share": 0},
                {"cell": "in1", "mask": "a", "share": 1}
            ]
        }"#,
    );

    assert_eq!(report.leak_count(), 1, "{:?}", report.diagnostics);
    assert_eq!(report.diagnostics[0].pc, 2);
    assert_eq!(report.diagnostics[0].source, "eor r5, r6");

    let out = device
        .memory_cell(&MemKey::Label("out0".to_string()))
        .unwrap();
    let shares = out.mask_shares().get("a").unwrap();
    assert_eq!(shares.iter().copied().collect::<Vec<_>>(), vec![0, 1]);
}

#[test]
fn anonymous_randomness_reuse_is_flagged_as_potential() {
    let (_, report) = run_files(
        "lds r3, rand0\nlds r4, rand1\neor r3, r4\n",
        r#"{"random": ["rand0", "rand1"]}"#,
    );

    assert_eq!(report.leak_count(), 1, "{:?}", report.diagnostics);
    assert_eq!(report.diagnostics[0].pc, 2);
    assert_eq!(
        report.diagnostics[0].kind,
        DiagnosticKind::Leak(Leak::PotentialRandomReuse)
    );
}

#[test]
fn distinct_masks_run_clean_through_stack_and_memory() {
    let (device, report) = run_files(
        "lds r5, in0\nlds r6, in1\neor r5, r6\npush r5\npop r7\n",
        r#"{
            "masks": [
                {"cell": "in0", "mask": "a", "share": 0},
                {"cell": "in1", "mask": "b", "share": 0}
            ]
        }"#,
    );

    assert!(report.is_clean(), "{:?}", report.diagnostics);
    assert_eq!(device.stack_pointer(), 0);
    assert!(device.stack_in_use());
    assert_eq!(device.register(7).mask_shares().len(), 2);
}

#[test]
fn a_faulting_instruction_does_not_stop_the_run() {
    let (device, report) = run_files(
        "lds r3, missing\nldi r16, 0x42\n",
        r#"{"masks": [{"cell": "in0", "mask": "a", "share": 0}]}"#,
    );

    assert_eq!(report.fault_count(), 1);
    assert_eq!(report.diagnostics[0].pc, 0);
    assert!(device.register(16).is_const());
    assert_eq!(device.program_counter(), 2);
}

#[test]
fn indirect_stores_reach_layout_cells_by_synthesized_label() {
    let (device, report) = run_files(
        "ldi YL, out\nldi YH, _\nlds r5, in0\nst Y, r5\n",
        r#"{"masks": [{"cell": "in0", "mask": "a", "share": 0}, {"cell": "_out", "mask": "a", "share": 1}]}"#,
    );

    // storing share 0 over the cell that still holds share 1 trips the
    // replace check on the memory cell itself
    assert_eq!(report.leak_count(), 1, "{:?}", report.diagnostics);
    assert_eq!(report.diagnostics[0].pc, 3);
    assert!(matches!(
        report.diagnostics[0].kind,
        DiagnosticKind::Leak(Leak::Mask(_))
    ));

    let cell = device.memory_cell(&MemKey::Label("_out".to_string())).unwrap();
    assert_eq!(cell, device.register(5));
}
