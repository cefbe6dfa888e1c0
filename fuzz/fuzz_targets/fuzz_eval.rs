#![no_main]

use std::cell::Cell;
use std::rc::Rc;

use hako::{ContextOptions, EvalFlags, Host, Runtime, RuntimeOptions};
use libfuzzer_sys::fuzz_target;

/// Interrupt polls before a script is aborted
const MAX_POLLS: u32 = 64;

#[derive(Default)]
struct BudgetHost {
    polls: Cell<u32>,
}

impl Host for BudgetHost {
    fn interrupt(&self) -> bool {
        let polls = self.polls.get() + 1;
        self.polls.set(polls);
        polls > MAX_POLLS
    }
}

fuzz_target!(|data: &[u8]| {
    // Only process valid UTF-8
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };

    if source.len() > 10_000 {
        return;
    }

    let options = RuntimeOptions {
        memory_limit: Some(32 * 1024 * 1024),
        max_stack_size: Some(512 * 1024),
        ..RuntimeOptions::default()
    };
    let runtime = Runtime::new(Rc::new(BudgetHost::default()), &options).unwrap();
    runtime.enable_interrupt_handler();
    let context = runtime.context(&ContextOptions::default()).unwrap();
    let ctx = context.ctx();

    // Exceptions are expected; crashes and leaks are not.
    let _ = ctx.eval(source, "fuzz.js", true, EvalFlags::GLOBAL);
    let _ = runtime.execute_pending_jobs(Some(1_000));
});
