//! Attribute macros for the spindle runtime.
//!
//! Both attributes rewrite a plain function into one that builds a
//! [`Runtime`](https://docs.rs/spindle), runs the original body as setup
//! code (spawning tasks, adding services) and then drives the event loop
//! until it is halted or goes idle. The body may take the runtime as its
//! single parameter:
//!
//! ```rust,ignore
//! #[spindle::main(timer_allowance_ms = 10)]
//! fn main(runtime: &spindle::Runtime) -> spindle::Result<()> {
//!     runtime.add_service(Service::new(addr, |_peer| echo()))?;
//!     Ok(())
//! }
//! ```

mod utils;

use proc_macro::TokenStream;

/// Runs the function body as setup code for a fresh runtime, then runs it.
///
/// Accepted settings: `timer_allowance_ms`, `out_queue_limit`.
#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    utils::expand(attr, item, false)
}

/// Like [`main`], for `#[test]` functions.
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    utils::expand(attr, item, true)
}
