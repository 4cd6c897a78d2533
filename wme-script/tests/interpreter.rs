mod common;

use anyhow::Result;
use pretty_assertions::assert_eq;

use common::{global, handle, init_logger, load, run, Door, TestHost};
use wme_script::{ImageBuilder, Opcode, Registry, ScriptState, Value, ValueType};

#[test]
fn arithmetic_and_concatenation() -> Result<()> {
    init_logger();
    let mut b = ImageBuilder::new();
    for name in ["sum", "quot", "rem", "text", "nothing"] {
        b.op_symbol(Opcode::DefGlobVar, name);
    }
    b.push_int(7).push_int(2).op(Opcode::Add).pop_var("sum");
    b.push_int(7).push_int(2).op(Opcode::Div).pop_var("quot");
    b.push_int(-7).push_int(3).op(Opcode::Modulo).pop_var("rem");
    b.push_string("door").push_int(2).op(Opcode::Add).pop_var("text");
    b.push_null().push_int(2).op(Opcode::Mul).pop_var("nothing");
    b.op(Opcode::Ret);

    let mut registry = Registry::default();
    let mut host = TestHost::default();
    let id = load(&mut registry, &b, "math.script")?;
    run(&mut registry, id, &mut host);

    assert_eq!(global(&registry, "sum").get_int(), 9);
    assert_eq!(global(&registry, "quot").get_float(), 3.5);
    assert_eq!(global(&registry, "rem").get_int(), -1);
    assert_eq!(global(&registry, "text").get_string(), "door2");
    assert!(global(&registry, "nothing").is_null());
    assert_eq!(registry.script(id).map(|s| s.state()), Some(ScriptState::Finished));
    assert!(host.errors.is_empty());
    Ok(())
}

#[test]
fn division_by_zero_is_contained() -> Result<()> {
    let mut b = ImageBuilder::new();
    b.op_symbol(Opcode::DefGlobVar, "a").op_symbol(Opcode::DefGlobVar, "b");
    b.op_symbol(Opcode::DefGlobVar, "after");
    b.line(3).push_int(1).push_int(0).op(Opcode::Div).pop_var("a");
    b.line(4).push_int(1).push_int(0).op(Opcode::Modulo).pop_var("b");
    b.push_bool(true).pop_var("after");
    b.op(Opcode::Ret);

    let mut registry = Registry::default();
    let mut host = TestHost::default();
    let id = load(&mut registry, &b, "zero.script")?;
    run(&mut registry, id, &mut host);

    assert!(global(&registry, "a").is_null());
    assert!(global(&registry, "b").is_null());
    assert!(global(&registry, "after").get_bool());
    assert_eq!(host.messages(), vec!["Division by zero.", "Division by zero."]);
    assert_eq!(host.errors.iter().map(|e| e.line).collect::<Vec<_>>(), vec![3, 4]);
    assert!(host.errors.iter().all(|e| !e.fatal && e.filename == "zero.script"));
    Ok(())
}

#[test]
fn suppressed_errors_do_not_reach_the_host() -> Result<()> {
    let mut b = ImageBuilder::new();
    b.push_int(1).push_int(0).op(Opcode::Div).op(Opcode::PopEmpty).op(Opcode::Ret);

    let config = wme_script::EngineConfigBuilder::new()
        .with_suppressed_script_errors(true)
        .get();
    let mut registry = Registry::new(config)?;
    let mut host = TestHost::default();
    let id = load(&mut registry, &b, "quiet.script")?;
    run(&mut registry, id, &mut host);
    assert!(host.errors.is_empty());
    Ok(())
}

#[test]
fn comparisons_loose_and_strict() -> Result<()> {
    let mut b = ImageBuilder::new();
    for name in ["loose", "strict", "less", "ne"] {
        b.op_symbol(Opcode::DefGlobVar, name);
    }
    b.push_int(1).push_string("1").op(Opcode::CmpEq).pop_var("loose");
    b.push_int(1).push_string("1").op(Opcode::CmpStrictEq).pop_var("strict");
    b.push_float(1.5).push_int(2).op(Opcode::CmpL).pop_var("less");
    b.push_int(1).push_float(1.0).op(Opcode::CmpStrictNe).pop_var("ne");
    b.op(Opcode::Ret);

    let mut registry = Registry::default();
    let mut host = TestHost::default();
    let id = load(&mut registry, &b, "cmp.script")?;
    run(&mut registry, id, &mut host);

    assert!(global(&registry, "loose").get_bool());
    assert!(!global(&registry, "strict").get_bool());
    assert!(global(&registry, "less").get_bool());
    assert!(global(&registry, "ne").get_bool());
    Ok(())
}

#[test]
fn loops_functions_and_scopes() -> Result<()> {
    let mut b = ImageBuilder::new();
    let double = b.label();
    b.op_symbol(Opcode::DefGlobVar, "total");
    b.push_int(0).pop_var("total");
    b.def_var("i");
    b.push_int(0).pop_var("i");

    let top = b.here();
    let done = b.label();
    b.push_var("i").push_int(3).op(Opcode::CmpL).jmp_false(done);
    b.push_var("i").push_int(1).call(double);
    b.push_var("total").op(Opcode::Add).pop_var("total");
    b.push_var("i").push_int(1).op(Opcode::Add).pop_var("i");
    b.jmp(top);
    b.bind(done);
    b.op(Opcode::Ret);

    // double(n): returns n * 2 through the operand stack.
    b.bind(double);
    b.op(Opcode::Scope).correct_stack(1);
    b.def_var("n").pop_var("n");
    b.push_var("n").push_int(2).op(Opcode::Mul);
    b.op(Opcode::PopReg1).op(Opcode::PushReg1);
    b.op(Opcode::Ret);
    b.function("double", double);

    let mut registry = Registry::default();
    let mut host = TestHost::default();
    let id = load(&mut registry, &b, "loop.script")?;
    run(&mut registry, id, &mut host);

    // 0*2 + 1*2 + 2*2
    assert_eq!(global(&registry, "total").get_int(), 6);
    let script = registry.script(id).expect("script");
    assert_eq!(script.state(), ScriptState::Finished);
    assert_eq!(script.globals().value("i").map(|v| v.get_int()), Some(3));
    // `n` lived in the function scope only.
    assert!(!script.globals().contains("n"));
    assert!(host.errors.is_empty());
    Ok(())
}

#[test]
fn constants_are_defined_once_and_read_only() -> Result<()> {
    let mut b = ImageBuilder::new();
    b.op_symbol(Opcode::DefConstVar, "MAX");
    b.op_symbol(Opcode::DefConstVar, "MAX");
    b.push_int(5).pop_var("MAX");
    b.op(Opcode::Ret);

    let mut registry = Registry::default();
    let mut host = TestHost::default();
    let id = load(&mut registry, &b, "const.script")?;
    run(&mut registry, id, &mut host);

    assert!(global(&registry, "MAX").is_null());
    assert_eq!(host.messages(), vec!["Cannot assign to constant 'MAX'."]);
    Ok(())
}

#[test]
fn object_properties_through_references() -> Result<()> {
    let mut b = ImageBuilder::new();
    b.op_symbol(Opcode::DefGlobVar, "obj").op_symbol(Opcode::DefGlobVar, "len");
    b.op(Opcode::CreateObject).pop_var("obj");
    // obj.Name = "gate"
    b.push_string("gate").op_symbol(Opcode::PushVarRef, "obj").push_string("Name").op(Opcode::PopByExp);
    // len = obj.Name.Length
    b.push_var("obj").push_string("Name").op(Opcode::PushByExp);
    b.push_string("Length").op(Opcode::PushByExp).pop_var("len");
    b.op(Opcode::Ret);

    let mut registry = Registry::default();
    let mut host = TestHost::default();
    let id = load(&mut registry, &b, "obj.script")?;
    run(&mut registry, id, &mut host);

    let obj = global(&registry, "obj");
    assert_eq!(obj.value_type(), ValueType::Object);
    assert_eq!(obj.get_property("Name").get_string(), "gate");
    assert_eq!(global(&registry, "len").get_int(), 4);
    Ok(())
}

#[test]
fn argument_windows_are_trimmed_and_padded() -> Result<()> {
    let mut b = ImageBuilder::new();
    b.op_symbol(Opcode::DefGlobVar, "trimmed").op_symbol(Opcode::DefGlobVar, "padded");
    b.op_symbol(Opcode::DefGlobVar, "marker");
    b.push_string("below");
    b.push_string("A").push_string("B").push_string("C").push_string("D");
    b.call_external("Join2", 4).pop_var("trimmed");
    b.push_string("A").push_string("B");
    b.call_external("Join4", 2).pop_var("padded");
    b.pop_var("marker");
    b.op(Opcode::Ret);

    let mut registry = Registry::default();
    let mut host = TestHost::default();
    let id = load(&mut registry, &b, "args.script")?;
    run(&mut registry, id, &mut host);

    // Kept [C, D]; the first argument is the last one pushed.
    assert_eq!(global(&registry, "trimmed").get_string(), "D,C");
    // [Null, Null, A, B]
    assert_eq!(global(&registry, "padded").get_string(), "B,A,_,_");
    // Values below the window are untouched.
    assert_eq!(global(&registry, "marker").get_string(), "below");
    assert!(host.errors.is_empty());
    Ok(())
}

#[test]
fn failing_externals_push_null_and_continue() -> Result<()> {
    let mut b = ImageBuilder::new();
    b.op_symbol(Opcode::DefGlobVar, "a").op_symbol(Opcode::DefGlobVar, "b");
    b.op_symbol(Opcode::DefGlobVar, "c");
    b.push_int(1).push_int(2).call_external("NoSuchThing", 2).pop_var("a");
    b.call_external("Explode", 0).pop_var("b");
    b.push_float(2.75).call_external("ToInt", 1).pop_var("c");
    b.op(Opcode::Ret);

    let mut registry = Registry::default();
    let mut host = TestHost::default();
    let id = load(&mut registry, &b, "ext.script")?;
    run(&mut registry, id, &mut host);

    assert!(global(&registry, "a").is_null());
    assert!(global(&registry, "b").is_null());
    assert_eq!(global(&registry, "c").get_int(), 2);
    assert_eq!(
        host.messages(),
        vec![
            "Call to undefined function 'NoSuchThing'. Ignored.",
            "Function 'Explode' failed: engine refused",
        ]
    );
    assert_eq!(registry.script(id).map(|s| s.stack().len()), Some(0));
    Ok(())
}

#[test]
fn failed_calls_drop_unread_arguments() -> Result<()> {
    let mut b = ImageBuilder::new();
    for name in ["a", "b", "marker"] {
        b.op_symbol(Opcode::DefGlobVar, name);
    }
    b.push_string("below");
    b.push_string("x").push_string("y").call_external("Refuse", 2).pop_var("a");
    b.push_string("x").push_string("y").push_int(2);
    b.push_var("door").push_string("Jam").op(Opcode::CallByExp).pop_var("b");
    b.pop_var("marker");
    b.op(Opcode::Ret);

    let mut registry = Registry::default();
    let mut host = TestHost::default();
    let door = Door::new();
    registry.globals().set("door", Value::native(handle(&door)));
    let id = load(&mut registry, &b, "refuse.script")?;
    run(&mut registry, id, &mut host);

    assert!(global(&registry, "a").is_null());
    assert!(global(&registry, "b").is_null());
    assert_eq!(global(&registry, "marker").get_string(), "below");
    assert_eq!(
        host.messages(),
        vec!["Function 'Refuse' failed: engine refused", "Method 'Jam' failed: door is jammed"]
    );
    assert_eq!(registry.script(id).map(|s| s.state()), Some(ScriptState::Finished));
    assert_eq!(registry.script(id).map(|s| s.stack().len()), Some(0));
    Ok(())
}

#[test]
fn underflow_inside_calls_is_a_fault() -> Result<()> {
    let mut registry = Registry::default();
    let mut host = TestHost::default();
    let door = Door::new();
    registry.globals().set("door", Value::native(handle(&door)));

    let mut b = ImageBuilder::new();
    b.op_symbol(Opcode::ExternalCall, "Sleep");
    let sleeper = load(&mut registry, &b, "sleep.script")?;

    // Claims three arguments with only one below the count.
    let mut b = ImageBuilder::new();
    b.push_int(1).push_int(3).push_var("door").push_string("Knock").op(Opcode::CallByExp);
    b.op(Opcode::Ret);
    let knocker = load(&mut registry, &b, "knock.script")?;

    run(&mut registry, sleeper, &mut host);
    run(&mut registry, knocker, &mut host);

    let state = |id| registry.script(id).map(|s| s.state());
    assert_eq!(state(sleeper), Some(ScriptState::Error));
    assert_eq!(state(knocker), Some(ScriptState::Error));
    assert_eq!(host.errors.len(), 2);
    assert!(host.errors.iter().all(|e| e.fatal));
    assert_eq!(door.borrow().knocks, 0);
    Ok(())
}

#[test]
fn invalid_opcode_finishes_and_bad_symbol_errors() -> Result<()> {
    let mut registry = Registry::default();
    let mut host = TestHost::default();

    let mut b = ImageBuilder::new();
    b.push_int(1).raw_u32(999);
    let bad_op = load(&mut registry, &b, "badop.script")?;

    let mut b = ImageBuilder::new();
    b.op_u32(Opcode::PushVar, 77);
    let bad_symbol = load(&mut registry, &b, "badsym.script")?;

    let mut b = ImageBuilder::new();
    b.op(Opcode::PopEmpty);
    let underflow = load(&mut registry, &b, "underflow.script")?;

    run(&mut registry, bad_op, &mut host);
    run(&mut registry, bad_symbol, &mut host);
    run(&mut registry, underflow, &mut host);

    let state = |id| registry.script(id).map(|s| s.state());
    assert_eq!(state(bad_op), Some(ScriptState::Finished));
    assert_eq!(state(bad_symbol), Some(ScriptState::Error));
    assert_eq!(state(underflow), Some(ScriptState::Error));
    assert_eq!(host.errors.len(), 3);
    assert!(host.errors.iter().all(|e| e.fatal));

    let stats = registry.tick(&mut host);
    assert_eq!(stats.removed, 3);
    assert!(registry.is_empty());
    Ok(())
}

#[test]
fn custom_dialect_runs_remapped_bytecode() -> Result<()> {
    let mut table: Vec<u32> = (0..wme_script::image::OPCODE_COUNT as u32).collect();
    table.reverse();
    let map = wme_script::OpcodeMap::from_table(&table)?;

    let mut b = ImageBuilder::new().with_opcode_map(map);
    b.op_symbol(Opcode::DefGlobVar, "x");
    b.push_int(20).push_int(22).op(Opcode::Add).pop_var("x");
    b.op(Opcode::Ret);

    let config = wme_script::EngineConfigBuilder::new()
        .with_dialect(wme_script::image::Dialect::Custom(table))
        .get();
    let mut registry = Registry::new(config)?;
    let mut host = TestHost::default();
    let id = load(&mut registry, &b, "remap.script")?;
    run(&mut registry, id, &mut host);

    assert_eq!(global(&registry, "x").get_int(), 42);
    Ok(())
}
