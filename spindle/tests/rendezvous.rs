use spindle::Runtime;
use spindle::sync::Lock;
use spindle::task::{Alt, Computation, Resume, Step, Token, Value, from_fn, once};

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// Waits on `key` forever, counting every wake-up.
fn counter(key: &'static str, hits: Rc<Cell<u32>>) -> impl Computation {
    let mut armed = false;

    from_fn(move |_| {
        if armed {
            hits.set(hits.get() + 1);
        }
        armed = true;
        Token::wait(key).into()
    })
}

#[test]
fn wait_fire_counts_each_fire_once() {
    let runtime = Runtime::new().unwrap();
    let hits = Rc::new(Cell::new(0));

    runtime.spawn(counter("boom!", hits.clone()));

    let mut script = vec![
        Token::sleep(Duration::from_millis(20)),
        Token::fire("boom!", ()),
        Token::sleep(Duration::from_millis(20)),
        Token::fire("boom!", ()),
    ]
    .into_iter();
    runtime.spawn(from_fn(move |_| match script.next() {
        Some(token) => token.into(),
        None => Step::done(()),
    }));

    runtime.run().unwrap();

    assert_eq!(hits.get(), 2);
}

#[test]
fn waiter_rearmed_after_fire_misses_the_next_one_in_the_same_pass() {
    let runtime = Runtime::new().unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));

    let slot = seen.clone();
    runtime.spawn(from_fn(move |input| match input {
        Resume::Start => Token::wait("tick").into(),
        Resume::Value(value) => {
            slot.borrow_mut().push(value);
            if slot.borrow().len() == 2 {
                return Step::done(());
            }
            Token::wait("tick").into()
        }
        Resume::Signal(signal) => Step::Raise(signal),
    }));

    // The two fires run back to back: the waiter is only re-armed after
    // the first one woke it, so the second finds nobody.
    let mut script = vec![
        Token::sleep(Duration::from_millis(10)),
        Token::fire("tick", "first"),
        Token::fire("tick", "second"),
        Token::sleep(Duration::from_millis(20)),
        Token::fire("tick", "third"),
    ]
    .into_iter();
    runtime.spawn(from_fn(move |_| match script.next() {
        Some(token) => token.into(),
        None => Step::done(()),
    }));

    runtime.run().unwrap();

    assert_eq!(*seen.borrow(), [Value::from("first"), Value::from("third")]);
}

#[test]
fn fire_wakes_every_current_waiter() {
    let runtime = Runtime::new().unwrap();
    let hits = Rc::new(Cell::new(0));

    for _ in 0..5 {
        runtime.spawn(counter("all", hits.clone()));
    }

    runtime.reactor().call_later(Duration::from_millis(40), || {
        Runtime::current().fire("all", ());
    });

    runtime.run().unwrap();

    assert_eq!(hits.get(), 5);
}

#[test]
fn late_waiter_misses_earlier_fire() {
    let runtime = Runtime::new().unwrap();
    let picked = Rc::new(RefCell::new(None));

    runtime.spawn(once(Token::fire("early", "gone")));

    let slot = picked.clone();
    let mut stage = 0;
    runtime.spawn(from_fn(move |input| {
        stage += 1;
        match stage {
            1 => Token::sleep(Duration::from_millis(20)).into(),
            2 => Token::first([
                Alt::Wait("early".into()),
                Alt::Sleep(Duration::from_millis(20)),
            ])
            .into(),
            _ => {
                *slot.borrow_mut() = input.into_result().ok().and_then(Value::into_picked);
                Step::done(())
            }
        }
    }));

    runtime.run().unwrap();

    assert_eq!(*picked.borrow(), Some((1, Value::Unit)));
}

#[test]
fn lock_serializes_critical_sections() {
    let runtime = Runtime::new().unwrap();
    let lock = Lock::new(1);
    let trace = Rc::new(RefCell::new(Vec::new()));

    for id in 0..3 {
        let (lock, trace) = (lock.clone(), trace.clone());
        let mut stage = 0;

        runtime.spawn(from_fn(move |input| {
            if let Resume::Signal(signal) = input {
                return Step::Raise(signal);
            }
            stage += 1;
            match stage {
                1 => Step::call(lock.acquire()),
                2 => {
                    trace.borrow_mut().push(("enter", id));
                    Token::sleep(Duration::from_millis(10)).into()
                }
                3 => {
                    trace.borrow_mut().push(("exit", id));
                    Step::call(lock.release())
                }
                _ => Step::done(()),
            }
        }));
    }

    runtime.run().unwrap();

    let trace = trace.borrow();
    assert_eq!(trace.len(), 6);
    for pair in trace.chunks(2) {
        assert_eq!(pair[0].0, "enter");
        assert_eq!(pair[1].0, "exit");
        assert_eq!(pair[0].1, pair[1].1);
    }
    assert_eq!(lock.available(), 1);
}

#[test]
fn remote_schedules_on_the_reactor_thread() {
    let runtime = Runtime::new().unwrap();
    let received = Rc::new(RefCell::new(None));

    let slot = received.clone();
    let mut waiting = false;
    runtime.spawn(from_fn(move |input| {
        if !waiting {
            waiting = true;
            return Token::wait("from-thread").into();
        }
        *slot.borrow_mut() = input.into_result().ok();
        Step::done(())
    }));

    let remote = runtime.remote();
    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        remote
            .schedule(|| Runtime::current().fire("from-thread", 42i64))
            .unwrap();
    });

    runtime.run().unwrap();
    worker.join().unwrap();

    assert_eq!(*received.borrow(), Some(Value::Int(42)));
}

#[test]
fn remote_work_outlives_its_handle() {
    let runtime = Runtime::new().unwrap();
    let ran = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..8u64)
        .map(|n| {
            let remote = runtime.remote();
            let ran = ran.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(n));
                remote
                    .schedule(move || {
                        ran.fetch_add(1, Ordering::AcqRel);
                    })
                    .unwrap();
                // The handle goes away before the reactor sees the command.
                drop(remote);
            })
        })
        .collect();

    runtime.run().unwrap();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(ran.load(Ordering::Acquire), 8);
}

#[spindle::test]
fn first_returns_the_fired_alternative(runtime: &Runtime) {
    let mut stage = 0;
    runtime.spawn(from_fn(move |input| {
        stage += 1;
        match stage {
            1 => Token::first([
                Alt::Wait("left".into()),
                Alt::Wait("right".into()),
                Alt::Sleep(Duration::from_secs(5)),
            ])
            .into(),
            _ => {
                let picked = input.into_result().ok().and_then(Value::into_picked);
                assert_eq!(picked, Some((1, Value::from("r"))));
                Step::done(())
            }
        }
    }));

    runtime.spawn(once(Token::fire("right", "r")));
}
