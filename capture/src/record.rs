//! Codec for the fixed-layout record the syscall probe submits per event.
//!
//! The probe writes its `data_t` struct verbatim, native endian:
//! `pid: u32`, `comm: [u8; 16]`, `filename: [u8; 256]`, `syscall: i32`,
//! `fd: i32`, 4 bytes of padding, `count: u64`.


use super::{Event, EventKind, Timestamp, COMM_LEN, FILENAME_LEN};

const PID_OFF: usize = 0;
const COMM_OFF: usize = PID_OFF + 4;
const FILENAME_OFF: usize = COMM_OFF + COMM_LEN;
const SYSCALL_OFF: usize = FILENAME_OFF + FILENAME_LEN;
const FD_OFF: usize = SYSCALL_OFF + 4;
// count is 8-byte aligned
const COUNT_OFF: usize = (FD_OFF + 4 + 7) & !7;

pub const RECORD_SZ: usize = COUNT_OFF + 8;

pub fn decode(buffer: &[u8; RECORD_SZ], observed_at: Timestamp) -> Event {
    let pid = u32::from_ne_bytes(word(buffer, PID_OFF));
    let comm = c_string(&buffer[COMM_OFF..COMM_OFF + COMM_LEN]);
    let filename = c_string(&buffer[FILENAME_OFF..FILENAME_OFF + FILENAME_LEN]);
    let syscall = i32::from_ne_bytes(word(buffer, SYSCALL_OFF));
    let fd = i32::from_ne_bytes(word(buffer, FD_OFF));

    let mut count = [0u8; 8];
    count.copy_from_slice(&buffer[COUNT_OFF..COUNT_OFF + 8]);
    let bytes = u64::from_ne_bytes(count);

    Event {
        pid,
        comm,
        kind: EventKind::from_syscall(syscall),
        filename,
        fd,
        bytes,
        observed_at,
    }
}

/// Strings longer than their field are truncated, leaving room for the NUL.
pub fn encode(event: &Event) -> [u8; RECORD_SZ] {
    let mut buffer = [0u8; RECORD_SZ];
    buffer[PID_OFF..PID_OFF + 4].copy_from_slice(&event.pid.to_ne_bytes());
    put_c_string(&mut buffer[COMM_OFF..COMM_OFF + COMM_LEN], &event.comm);
    put_c_string(
        &mut buffer[FILENAME_OFF..FILENAME_OFF + FILENAME_LEN],
        &event.filename,
    );
    buffer[SYSCALL_OFF..SYSCALL_OFF + 4].copy_from_slice(&event.kind.syscall().to_ne_bytes());
    buffer[FD_OFF..FD_OFF + 4].copy_from_slice(&event.fd.to_ne_bytes());
    buffer[COUNT_OFF..COUNT_OFF + 8].copy_from_slice(&event.bytes.to_ne_bytes());
    buffer
}

fn word(buffer: &[u8], offset: usize) -> [u8; 4] {
    let mut w = [0u8; 4];
    w.copy_from_slice(&buffer[offset..offset + 4]);
    w
}

fn c_string(field: &[u8]) -> String {
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn put_c_string(field: &mut [u8], s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(field.len() - 1);
    field[..len].copy_from_slice(&bytes[..len]);
}
