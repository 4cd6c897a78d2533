mod common;

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;
use pretty_assertions::assert_eq;

use common::{load, TestHost};
use wme_script::debug::{ErrorCode, ScriptMonitor, StopInfo, StopReason};
use wme_script::test::NullHost;
use wme_script::{DebugConfig, EngineConfigBuilder, ImageBuilder, Opcode, Registry, ScriptErrorReport};

#[derive(Default)]
struct Recorder {
    stops: Rc<RefCell<Vec<StopInfo>>>,
    errors: Rc<RefCell<Vec<String>>>,
}

impl ScriptMonitor for Recorder {
    fn on_break(&mut self, stop: &StopInfo) {
        self.stops.borrow_mut().push(stop.clone());
    }

    fn on_runtime_error(&mut self, report: &ScriptErrorReport) {
        self.errors.borrow_mut().push(report.message.clone());
    }
}

fn attach(registry: &mut Registry) -> (Rc<RefCell<Vec<StopInfo>>>, Rc<RefCell<Vec<String>>>) {
    let recorder = Recorder::default();
    let handles = (Rc::clone(&recorder.stops), Rc::clone(&recorder.errors));
    registry.attach_debugger(Box::new(recorder));
    handles
}

/// Line 3 tests `i < 5`, line 4 increments `i`, line 6 returns.
fn counting_loop() -> ImageBuilder {
    let mut b = ImageBuilder::new();
    b.def_var("i").push_int(0).pop_var("i");
    let top = b.here();
    let end = b.label();
    b.line(3).push_var("i").push_int(5).op(Opcode::CmpL).jmp_false(end);
    b.line(4).push_var("i").push_int(1).op(Opcode::Add).pop_var("i");
    b.jmp(top);
    b.bind(end);
    b.line(6).op(Opcode::Ret);
    b
}

/// Ticks until the registry empties, continuing after every break.
fn run_continuing(registry: &mut Registry, host: &mut TestHost) -> usize {
    let mut breaks = 0;
    for _ in 0..100 {
        if registry.is_empty() {
            break;
        }
        if registry.tick(host).stopped || registry.is_stopped() {
            breaks += 1;
            registry.step_continue().expect("continue");
        }
    }
    breaks
}

#[test]
fn breakpoint_hits_are_counted_per_file_and_line() -> Result<()> {
    let mut registry = Registry::default();
    let mut host = TestHost::default();
    let (stops, _) = attach(&mut registry);

    load(&mut registry, &counting_loop(), "loop.script")?;
    let mut other = ImageBuilder::new();
    other.line(4).line(3).op(Opcode::Ret);
    load(&mut registry, &other, "other.script")?;

    let id = registry.add_breakpoint("loop.script", 4)?;
    assert_eq!(
        registry.add_breakpoint("LOOP.script", 4).unwrap_err().code,
        ErrorCode::DuplicateBreakpoint
    );

    assert_eq!(run_continuing(&mut registry, &mut host), 5);
    assert_eq!(registry.breakpoints()[0].id, id);
    assert_eq!(registry.breakpoints()[0].hits, 5);

    let stops = stops.borrow();
    assert_eq!(stops.len(), 5);
    assert!(stops
        .iter()
        .all(|s| s.filename == "loop.script" && s.line == 4 && s.reason == StopReason::Breakpoint(id)));
    Ok(())
}

#[test]
fn disabled_and_removed_breakpoints_stay_quiet() -> Result<()> {
    let mut registry = Registry::default();
    let mut host = TestHost::default();
    let (stops, _) = attach(&mut registry);
    load(&mut registry, &counting_loop(), "loop.script")?;

    let line3 = registry.add_breakpoint("loop.script", 3)?;
    let line4 = registry.add_breakpoint("loop.script", 4)?;
    registry.disable_breakpoint(line3)?;
    registry.remove_breakpoint(line4)?;
    assert_eq!(registry.remove_breakpoint(line4).unwrap_err().code, ErrorCode::NoSuchBreakpoint);

    assert_eq!(run_continuing(&mut registry, &mut host), 0);
    assert!(stops.borrow().is_empty());
    assert_eq!(registry.breakpoints().len(), 1);
    Ok(())
}

#[test]
fn watches_fire_on_change_after_a_baseline() -> Result<()> {
    let mut b = ImageBuilder::new();
    b.def_var("i").push_int(0).pop_var("i");
    b.line(1).push_int(1).pop_var("i");
    b.line(2);
    b.line(3).push_int(2).pop_var("i");
    b.line(4).op(Opcode::Ret);

    let mut registry = Registry::default();
    let mut host = TestHost::default();
    let (stops, _) = attach(&mut registry);
    load(&mut registry, &b, "watch.script")?;
    let watch = registry.add_watch("watch.script", "i")?;

    assert_eq!(run_continuing(&mut registry, &mut host), 2);
    assert_eq!(registry.watches()[0].hits, 2);
    let lines: Vec<u32> = stops.borrow().iter().map(|s| s.line).collect();
    assert_eq!(lines, vec![2, 4]);
    assert!(stops.borrow().iter().all(|s| s.reason == StopReason::Watch(watch)));
    Ok(())
}

#[test]
fn stepping_into_over_and_out_of_calls() -> Result<()> {
    let mut b = ImageBuilder::new();
    let f = b.label();
    b.line(1).push_int(0).call(f).op(Opcode::PopEmpty);
    b.line(2).op(Opcode::Ret);
    b.bind(f);
    b.op(Opcode::Scope).correct_stack(0);
    b.line(10).line(11).push_null().op(Opcode::Ret);

    let mut registry = Registry::default();
    let mut host = TestHost::default();
    let (stops, _) = attach(&mut registry);
    load(&mut registry, &b, "step.script")?;
    registry.add_breakpoint("step.script", 10)?;

    assert!(registry.tick(&mut host).stopped);
    assert_eq!(registry.stop_info().map(|s| s.line), Some(10));

    registry.step()?;
    assert!(registry.tick(&mut host).stopped);
    assert_eq!(registry.stop_info().map(|s| (s.line, s.reason)), Some((11, StopReason::Step)));

    registry.step_finish()?;
    assert!(registry.tick(&mut host).stopped);
    assert_eq!(registry.stop_info().map(|s| s.line), Some(2));

    registry.step_continue()?;
    assert!(!registry.tick(&mut host).stopped);
    assert!(registry.is_empty());
    assert_eq!(stops.borrow().len(), 3);
    Ok(())
}

#[test]
fn inspecting_and_changing_values_at_a_break() -> Result<()> {
    let mut registry = Registry::default();
    let mut host = TestHost::default();
    attach(&mut registry);
    load(&mut registry, &counting_loop(), "loop.script")?;
    registry.add_breakpoint("loop.script", 4)?;

    assert_eq!(registry.read_value("i").unwrap_err().code, ErrorCode::NotAllowed);
    assert!(registry.tick(&mut host).stopped);
    assert_eq!(registry.read_value("i")?.get_int(), 0);
    assert_eq!(registry.read_value("nope").unwrap_err().code, ErrorCode::NoSuchVariable);
    assert_eq!(registry.set_value("i", "four").unwrap_err().code, ErrorCode::ParseError);

    // Jump ahead: the loop ends after this pass.
    registry.set_value("i", "4")?;
    assert_eq!(run_continuing(&mut registry, &mut host), 0);
    assert_eq!(registry.breakpoints()[0].hits, 1);
    Ok(())
}

#[test]
fn runtime_errors_reach_the_monitor() -> Result<()> {
    let mut b = ImageBuilder::new();
    b.push_int(1).push_int(0).op(Opcode::Div).op(Opcode::PopEmpty).op(Opcode::Ret);

    let mut registry = Registry::default();
    let mut host = TestHost::default();
    let (_, errors) = attach(&mut registry);
    load(&mut registry, &b, "zero.script")?;
    registry.tick(&mut host);
    assert_eq!(*errors.borrow(), vec!["Division by zero.".to_owned()]);
    Ok(())
}

#[test]
fn source_listing_around_the_stop() -> Result<()> {
    let root = std::env::temp_dir().join(format!("wme-script-listing-{}", std::process::id()));
    std::fs::create_dir_all(root.join("scripts"))?;
    let source: String = (1..=12).map(|n| format!("line {n}\n")).collect();
    std::fs::write(root.join("scripts/loop.script"), source)?;

    let config = EngineConfigBuilder::new()
        .with_debug_config(DebugConfig {
            source_root: Some(root.clone()),
            listing_context: 2,
            ..DebugConfig::default()
        })
        .get();
    let mut registry = Registry::new(config)?;
    let mut host = TestHost::default();
    attach(&mut registry);
    load(&mut registry, &counting_loop(), "scripts\\loop.script")?;
    registry.add_breakpoint("scripts\\loop.script", 4)?;
    assert!(registry.tick(&mut host).stopped);

    let listing = registry.source_listing()?;
    assert_eq!(listing.first_line, 2);
    assert_eq!(listing.lines, vec!["line 2", "line 3", "line 4", "line 5", "line 6"]);
    assert!(listing.to_string().contains("->    4  line 4"));

    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn listing_needs_a_source_root() -> Result<()> {
    let mut registry = Registry::default();
    let mut host = TestHost::default();
    attach(&mut registry);
    load(&mut registry, &counting_loop(), "loop.script")?;
    registry.add_breakpoint("loop.script", 3)?;
    assert!(registry.tick(&mut host).stopped);
    assert_eq!(registry.source_listing().unwrap_err().code, ErrorCode::SourcePathNotSet);
    Ok(())
}

#[test]
fn disabled_watches_and_detached_debuggers_stay_quiet() -> Result<()> {
    let mut registry = Registry::default();
    let mut host = NullHost;
    let (stops, _) = attach(&mut registry);
    load(&mut registry, &counting_loop(), "loop.script")?;

    let watch = registry.add_watch("loop.script", "i")?;
    registry.disable_watch(watch)?;
    assert!(!registry.tick(&mut host).stopped);
    assert!(stops.borrow().is_empty());

    registry.enable_watch(watch)?;
    registry.remove_watch(watch)?;
    assert_eq!(registry.enable_watch(watch).unwrap_err().code, ErrorCode::NoSuchWatch);

    load(&mut registry, &counting_loop(), "loop.script")?;
    registry.add_breakpoint("loop.script", 4)?;
    let detached = registry.detach_debugger().expect("attached");
    assert_eq!(detached.breakpoints().len(), 1);
    assert!(registry.debugger().is_none());

    registry.tick(&mut host);
    assert!(registry.is_empty());
    assert!(stops.borrow().is_empty());
    Ok(())
}
