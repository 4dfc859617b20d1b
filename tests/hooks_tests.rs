#![allow(missing_docs)]

use std::cell::RefCell;

use gravec::value::{Instance, ObjRef};
use gravec::{
    registry, ClassSpec, DataInput, DataOutput, Gravec, GravecError, ObjectDecoder, ObjectEncoder,
    Value,
};

fn register_once(spec: ClassSpec) -> std::sync::Arc<registry::RuntimeClass> {
    registry::register(spec).unwrap()
}

// --- block-data framing ---

fn blob_write(_inst: &Instance, out: &mut dyn DataOutput) -> gravec::Result<()> {
    out.default_write()?;
    out.write_u32(0xDEAD_BEEF)?;
    out.write_utf("extra")?;
    out.encode_value(&Value::string("nested"))?;
    Ok(())
}

fn blob_read(obj: &ObjRef, input: &mut dyn DataInput) -> gravec::Result<()> {
    input.default_read()?;
    assert_eq!(input.read_u32()?, 0xDEAD_BEEF);
    assert_eq!(input.read_utf()?, "extra");
    assert!(matches!(input.decode_value()?, Value::Str(s) if &*s == "nested"));
    let _ = obj;
    Ok(())
}

#[test]
fn custom_hook_sees_exactly_what_the_writer_wrote() {
    let class = register_once(
        ClassSpec::new("hk.Blob")
            .field_int("n")
            .on_write(blob_write)
            .on_read(blob_read),
    );
    let mut inst = class.new_instance();
    inst.set("n", Value::Int(7)).unwrap();

    let bytes = Gravec::to_bytes(&Value::object(inst)).unwrap();
    let back = Gravec::from_bytes(&bytes).unwrap();
    let Value::Object(obj) = back else {
        panic!("expected an object");
    };
    assert!(matches!(obj.borrow().get("n").unwrap(), Value::Int(7)));
}

fn under_write(_inst: &Instance, out: &mut dyn DataOutput) -> gravec::Result<()> {
    out.default_write()?;
    out.write_bytes(&[1, 2, 3, 4, 5, 6, 7, 8])
}

fn under_read(_obj: &ObjRef, input: &mut dyn DataInput) -> gravec::Result<()> {
    // Deliberately leaves the writer's extra bytes unread.
    input.default_read()
}

#[test]
fn unread_custom_data_is_skipped() {
    let class = register_once(
        ClassSpec::new("hk.Under")
            .field_int("n")
            .on_write(under_write)
            .on_read(under_read),
    );
    let mut inst = class.new_instance();
    inst.set("n", Value::Int(3)).unwrap();

    let mut encoder = ObjectEncoder::new(Vec::new()).unwrap();
    encoder.encode(&Value::object(inst)).unwrap();
    encoder.encode(&Value::string("after")).unwrap();
    let bytes = encoder.into_inner().unwrap();

    let mut decoder = ObjectDecoder::new(bytes.as_slice()).unwrap();
    let first = decoder.decode().unwrap();
    assert!(matches!(first, Value::Object(_)));
    // The engine must land exactly on the next record.
    assert!(matches!(decoder.decode().unwrap(), Value::Str(s) if &*s == "after"));
}

fn over_write(_inst: &Instance, out: &mut dyn DataOutput) -> gravec::Result<()> {
    out.write_bytes(&[0xAA, 0xBB])
}

fn over_read(_obj: &ObjRef, input: &mut dyn DataInput) -> gravec::Result<()> {
    input.read_u32().map(|_| ())
}

#[test]
fn reading_past_custom_data_is_optional_data() {
    let class = register_once(
        ClassSpec::new("hk.Over")
            .on_write(over_write)
            .on_read(over_read),
    );
    let bytes = Gravec::to_bytes(&Value::object(class.new_instance())).unwrap();
    let err = Gravec::from_bytes(&bytes).unwrap_err();
    assert!(matches!(err, GravecError::OptionalData(_)));
}

// --- hook surfaces outside their window ---

#[test]
fn default_write_outside_a_hook_is_not_active() {
    let mut encoder = ObjectEncoder::new(Vec::new()).unwrap();
    assert!(matches!(
        encoder.default_write().unwrap_err(),
        GravecError::NotActive(_)
    ));
}

#[test]
fn default_read_and_validation_outside_a_hook_are_not_active() {
    let bytes = Gravec::to_bytes(&Value::Null).unwrap();
    let mut decoder = ObjectDecoder::new(bytes.as_slice()).unwrap();
    assert!(matches!(
        decoder.default_read().unwrap_err(),
        GravecError::NotActive(_)
    ));
    assert!(matches!(
        decoder
            .register_validation(0, Box::new(|| Ok(())))
            .unwrap_err(),
        GravecError::NotActive(_)
    ));
}

// --- substitution ---

fn replace_with_string(_v: Value) -> gravec::Result<Value> {
    Ok(Value::string("swapped"))
}

#[test]
fn write_replace_substitutes_before_encoding() {
    let class = register_once(
        ClassSpec::new("hk.Replaced")
            .field_int("n")
            .write_replace(replace_with_string),
    );
    let bytes = Gravec::to_bytes(&Value::object(class.new_instance())).unwrap();
    assert!(matches!(
        Gravec::from_bytes(&bytes).unwrap(),
        Value::Str(s) if &*s == "swapped"
    ));
}

fn replace_with_fresh_token(_v: Value) -> gravec::Result<Value> {
    // A new allocation on every call; identity must still collapse.
    Ok(Value::string("token"))
}

#[test]
fn repeated_occurrences_of_a_replaced_value_share_one_substitute() {
    register_once(
        ClassSpec::new("hk.Tokenized")
            .field_int("n")
            .write_replace(replace_with_fresh_token),
    );
    let pair = register_once(
        ClassSpec::new("hk.TokenPair")
            .field_object("a", "hk.Tokenized")
            .field_object("b", "hk.Tokenized"),
    );
    let one = Value::object(registry::resolve("hk.Tokenized").unwrap().new_instance());
    let mut inst = pair.new_instance();
    inst.set("a", one.clone()).unwrap();
    inst.set("b", one).unwrap();

    let bytes = Gravec::to_bytes(&Value::object(inst)).unwrap();
    let back = Gravec::from_bytes(&bytes).unwrap();
    let Value::Object(obj) = back else {
        panic!("expected an object");
    };
    let obj = obj.borrow();
    let a = obj.get("a").unwrap();
    let b = obj.get("b").unwrap();
    assert!(matches!(&a, Value::Str(s) if &**s == "token"));
    assert!(
        a.identity_eq(&b),
        "the second occurrence must back-reference the first substitute"
    );
}

fn resolve_to_string(_v: Value) -> gravec::Result<Value> {
    Ok(Value::string("canon"))
}

#[test]
fn read_resolve_substitutes_and_updates_the_handle() {
    register_once(
        ClassSpec::new("hk.Canon")
            .field_int("n")
            .read_resolve(resolve_to_string),
    );
    let pair = register_once(
        ClassSpec::new("hk.CanonPair")
            .field_object("a", "hk.Canon")
            .field_object("b", "hk.Canon"),
    );
    let canon = Value::object(registry::resolve("hk.Canon").unwrap().new_instance());
    let mut inst = pair.new_instance();
    inst.set("a", canon.clone()).unwrap();
    inst.set("b", canon).unwrap();

    let bytes = Gravec::to_bytes(&Value::object(inst)).unwrap();
    let back = Gravec::from_bytes(&bytes).unwrap();
    let Value::Object(obj) = back else {
        panic!("expected an object");
    };
    let obj = obj.borrow();
    let a = obj.get("a").unwrap();
    let b = obj.get("b").unwrap();
    assert!(matches!(&a, Value::Str(s) if &**s == "canon"));
    assert!(
        a.identity_eq(&b),
        "the back-reference must see the resolved value"
    );
}

#[test]
fn session_replacer_and_resolver_substitute_values() {
    register_once(ClassSpec::new("hk.Plain").field_int("n"));

    let mut encoder = ObjectEncoder::new(Vec::new()).unwrap();
    encoder.set_replacer(Box::new(|v| {
        if matches!(v, Value::Object(_)) {
            Ok(Value::string("flattened"))
        } else {
            Ok(v)
        }
    }));
    let inst = registry::resolve("hk.Plain").unwrap().new_instance();
    encoder.encode(&Value::object(inst)).unwrap();
    let bytes = encoder.into_inner().unwrap();

    let mut decoder = ObjectDecoder::new(bytes.as_slice()).unwrap();
    decoder.set_resolver(Box::new(|v| match v {
        Value::Str(s) if &*s == "flattened" => Ok(Value::string("restored")),
        other => Ok(other),
    }));
    assert!(matches!(
        decoder.decode().unwrap(),
        Value::Str(s) if &*s == "restored"
    ));
}

fn never_stable(_v: Value) -> gravec::Result<Value> {
    let class = registry::resolve("hk.Unstable")?;
    Ok(Value::object(class.new_instance()))
}

#[test]
fn replacement_chain_that_never_stabilizes_is_rejected() {
    let class = register_once(ClassSpec::new("hk.Unstable").write_replace(never_stable));
    let err = Gravec::to_bytes(&Value::object(class.new_instance())).unwrap_err();
    let GravecError::WriteAborted(msg) = err else {
        panic!("expected a write abort");
    };
    assert!(msg.contains("stabilize"));
}

#[test]
fn captured_failure_surfaces_to_the_reader_as_write_aborted() {
    register_once(ClassSpec::new("hk.Unstable").write_replace(never_stable));
    let outer = register_once(
        ClassSpec::new("hk.Outer")
            .field_int("id")
            .field_object("item", "hk.Unstable"),
    );
    let mut inst = outer.new_instance();
    inst.set("id", Value::Int(9)).unwrap();
    inst.set(
        "item",
        Value::object(registry::resolve("hk.Unstable").unwrap().new_instance()),
    )
    .unwrap();

    let mut encoder = ObjectEncoder::new(Vec::new()).unwrap();
    let err = encoder.encode(&Value::object(inst)).unwrap_err();
    assert!(matches!(err, GravecError::WriteAborted(_)));

    // The stream stays parseable and replays the failure.
    let bytes = encoder.into_inner().unwrap();
    let err = Gravec::from_bytes(&bytes).unwrap_err();
    assert!(matches!(err, GravecError::WriteAborted(_)));
}

fn partial_write(_inst: &Instance, out: &mut dyn DataOutput) -> gravec::Result<()> {
    out.write_u32(7)?;
    Err(GravecError::NotSerializable("gave up mid-hook".into()))
}

#[test]
fn mid_hook_failure_still_replays_as_write_aborted() {
    // The hook dies with block data buffered; the capture must close
    // out the partial frame so the failure record stays reachable.
    let class = register_once(ClassSpec::new("hk.MidFail").on_write(partial_write));

    let mut encoder = ObjectEncoder::new(Vec::new()).unwrap();
    let err = encoder.encode(&Value::object(class.new_instance())).unwrap_err();
    assert!(matches!(err, GravecError::WriteAborted(_)));

    let bytes = encoder.into_inner().unwrap();
    let err = Gravec::from_bytes(&bytes).unwrap_err();
    assert!(matches!(err, GravecError::WriteAborted(_)));
}

// --- external encoding ---

fn ext_write(inst: &Instance, out: &mut dyn DataOutput) -> gravec::Result<()> {
    let Value::Int(code) = inst.get("code")? else {
        return Err(GravecError::InvalidClass("code must be an int".into()));
    };
    out.write_i32(code)
}

fn ext_read(obj: &ObjRef, input: &mut dyn DataInput) -> gravec::Result<()> {
    let code = input.read_i32()?;
    obj.borrow_mut().set("code", Value::Int(code))
}

#[test]
fn external_class_owns_its_wire_format() {
    let class = register_once(
        ClassSpec::new("hk.Ext")
            .field_int("code")
            .external()
            .on_write(ext_write)
            .on_read(ext_read),
    );
    let mut inst = class.new_instance();
    inst.set("code", Value::Int(1234)).unwrap();

    let bytes = Gravec::to_bytes(&Value::object(inst)).unwrap();
    let back = Gravec::from_bytes(&bytes).unwrap();
    let Value::Object(obj) = back else {
        panic!("expected an object");
    };
    assert!(matches!(obj.borrow().get("code").unwrap(), Value::Int(1234)));
}

// --- validation ---

thread_local! {
    static VALIDATION_LOG: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
}

fn validated_read(_obj: &ObjRef, input: &mut dyn DataInput) -> gravec::Result<()> {
    input.default_read()?;
    input.register_validation(1, Box::new(|| {
        VALIDATION_LOG.with(|l| l.borrow_mut().push("low"));
        Ok(())
    }))?;
    input.register_validation(5, Box::new(|| {
        VALIDATION_LOG.with(|l| l.borrow_mut().push("high"));
        Ok(())
    }))?;
    input.register_validation(1, Box::new(|| {
        VALIDATION_LOG.with(|l| l.borrow_mut().push("low2"));
        Ok(())
    }))?;
    Ok(())
}

#[test]
fn validations_run_by_priority_then_reverse_registration() {
    let class = register_once(
        ClassSpec::new("hk.Validated")
            .field_int("id")
            .on_read(validated_read),
    );
    let bytes = Gravec::to_bytes(&Value::object(class.new_instance())).unwrap();

    VALIDATION_LOG.with(|l| l.borrow_mut().clear());
    Gravec::from_bytes(&bytes).unwrap();
    let log = VALIDATION_LOG.with(|l| l.borrow().clone());
    assert_eq!(log, vec!["high", "low2", "low"]);
}

fn rejecting_read(_obj: &ObjRef, input: &mut dyn DataInput) -> gravec::Result<()> {
    input.default_read()?;
    input.register_validation(0, Box::new(|| {
        Err(GravecError::InvalidClass("graph failed validation".into()))
    }))
}

#[test]
fn failing_validation_fails_the_decode() {
    let class = register_once(
        ClassSpec::new("hk.Rejected")
            .field_int("id")
            .on_read(rejecting_read),
    );
    let bytes = Gravec::to_bytes(&Value::object(class.new_instance())).unwrap();
    let err = Gravec::from_bytes(&bytes).unwrap_err();
    assert!(matches!(err, GravecError::InvalidClass(_)));
}
