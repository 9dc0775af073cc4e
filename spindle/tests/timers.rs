use spindle::Runtime;
use spindle::task::{Computation, Step, Token, from_fn};

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

const ALLOWANCE: Duration = Duration::from_millis(30);

fn sleeper(duration: Duration, woke: Rc<RefCell<Vec<Instant>>>) -> impl Computation {
    let mut slept = false;

    from_fn(move |_| {
        if !slept {
            slept = true;
            return Token::sleep(duration).into();
        }
        woke.borrow_mut().push(Instant::now());
        Step::done(())
    })
}

#[test]
fn call_later_fires_exactly_once() {
    let runtime = Runtime::new().unwrap();
    let fired = Rc::new(Cell::new(0));
    let delay = Duration::from_millis(50);

    let start = Instant::now();
    let counter = fired.clone();
    let timer = runtime.reactor().call_later(delay, move || {
        counter.set(counter.get() + 1);
    });

    runtime.run().unwrap();

    assert_eq!(fired.get(), 1);
    assert!(!timer.is_pending());
    assert!(start.elapsed() + ALLOWANCE >= delay);
}

#[test]
fn cancelled_timer_never_fires() {
    let runtime = Runtime::new().unwrap();
    let fired = Rc::new(Cell::new(false));

    let flag = fired.clone();
    let timer = runtime
        .reactor()
        .call_later(Duration::from_secs(10), move || flag.set(true));
    timer.cancel();

    let start = Instant::now();
    runtime.run().unwrap();

    assert!(!fired.get());
    // A cancelled timer does not keep the loop alive.
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn sleeps_of_equal_length_batch_together() {
    let runtime = Runtime::new().unwrap();
    let woke = Rc::new(RefCell::new(Vec::new()));
    let duration = Duration::from_millis(100);

    let start = Instant::now();
    for _ in 0..10 {
        runtime.spawn(sleeper(duration, woke.clone()));
    }
    runtime.run().unwrap();

    let woke = woke.borrow();
    assert_eq!(woke.len(), 10);

    let first = *woke.iter().min().unwrap();
    let last = *woke.iter().max().unwrap();
    assert!(last - first <= ALLOWANCE);
    assert!(first + ALLOWANCE >= start + duration);
}

#[test]
fn zero_sleep_yields_to_other_tasks() {
    let runtime = Runtime::new().unwrap();
    let order = Rc::new(RefCell::new(String::new()));

    for name in ['a', 'b'] {
        let order = order.clone();
        let mut rounds = 0;
        runtime.spawn(from_fn(move |_| {
            if rounds == 3 {
                return Step::done(());
            }
            rounds += 1;
            order.borrow_mut().push(name);
            Token::yield_now().into()
        }));
    }

    runtime.run().unwrap();
    assert_eq!(*order.borrow(), "ababab");
}

#[test]
fn sleeps_wake_in_deadline_order() {
    let runtime = Runtime::new().unwrap();
    let woke = Rc::new(RefCell::new(Vec::new()));

    runtime.spawn(sleeper(Duration::from_millis(20), woke.clone()));
    runtime.spawn(sleeper(Duration::from_millis(80), woke.clone()));

    let start = Instant::now();
    runtime.run().unwrap();

    let woke = woke.borrow();
    assert_eq!(woke.len(), 2);
    assert!(woke[0] <= woke[1]);
    assert!(woke[1] + ALLOWANCE >= start + Duration::from_millis(80));
}

#[spindle::test(timer_allowance_ms = 5)]
fn nested_sleeps_resume_in_order(runtime: &Runtime) {
    let mut stage = 0;
    let mut started = Instant::now();

    runtime.spawn(from_fn(move |_| {
        stage += 1;
        match stage {
            1 => {
                started = Instant::now();
                Step::call(spindle::task::once(Token::sleep(Duration::from_millis(20))))
            }
            2 => Step::call(spindle::task::once(Token::sleep(Duration::from_millis(20)))),
            _ => {
                assert!(started.elapsed() + Duration::from_millis(10) >= Duration::from_millis(40));
                Step::done(())
            }
        }
    }));
}
