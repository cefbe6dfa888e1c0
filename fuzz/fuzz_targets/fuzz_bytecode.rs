#![no_main]

use std::rc::Rc;

use hako::{ContextOptions, EvalFlags, NoopHost, Runtime, RuntimeOptions};
use libfuzzer_sys::fuzz_target;

// Bytecode read from the engine's own writer is trusted; arbitrary bytes are not,
// so inputs go through compile first and only the output is read back.
fuzz_target!(|data: &[u8]| {
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };

    if source.len() > 10_000 {
        return;
    }

    let runtime = Runtime::new(Rc::new(NoopHost), &RuntimeOptions::default()).unwrap();
    let context = runtime.context(&ContextOptions::default()).unwrap();
    let ctx = context.ctx();

    let Ok(bytes) = ctx.compile_to_bytecode(source, "fuzz.js", true, EvalFlags::GLOBAL) else {
        return;
    };

    let reader = runtime.context(&ContextOptions::default()).unwrap();
    // Modules with imports fail to link here; that is an exception, not a crash.
    let _ = reader.ctx().evaluate_bytecode(&bytes, true);
});
