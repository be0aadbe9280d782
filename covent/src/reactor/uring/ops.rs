use crate::error::Error;
use crate::reactor::uring::Operation;
use io_uring::opcode;
use io_uring::squeue::Entry;
use io_uring::types::Timespec;
use std::io;
use std::time::Duration;

fn check(res: i32) -> Result<i32, Error> {
    if res < 0 {
        Err(io::Error::from_raw_os_error(-res).into())
    } else {
        Ok(res)
    }
}

/// Relative kernel timeout.
///
/// The timeout only fires on expiry, it is not satisfied early by unrelated
/// completions.
#[derive(Debug, Clone)]
pub struct Timeout {
    ts: Timespec,
}

impl Timeout {
    pub fn new(duration: Duration) -> Self {
        Timeout {
            ts: Timespec::from(duration),
        }
    }
}

// Safety: the kernel copies the timespec when the entry is submitted.
unsafe impl Operation for Timeout {
    type Output = ();

    fn setup_request(&mut self) -> Entry {
        opcode::Timeout::new(&self.ts as *const Timespec).build()
    }

    fn on_resume(&mut self, res: i32, _flags: u32) -> Result<(), Error> {
        // Expiry is reported as -ETIME.
        if res == -libc::ETIME {
            return Ok(());
        }

        check(res).map(|_| ())
    }
}

/// No-op request, completes as soon as the kernel processes it.
#[derive(Debug, Clone, Default)]
pub struct Nop;

// Safety: a nop references no memory.
unsafe impl Operation for Nop {
    type Output = i32;

    fn setup_request(&mut self) -> Entry {
        opcode::Nop::new().build()
    }

    fn on_resume(&mut self, res: i32, _flags: u32) -> Result<i32, Error> {
        check(res)
    }
}
