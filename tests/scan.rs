//! Dump passes over fake map listings and memory images.

#![cfg(target_os = "linux")]


use memslurp::{
    target::{MappedRead, ReadStrategy, RegionBytes, TraceOp},
    RegionDump, RegionReadError, ScanError, ScanResult,
};
use nix::{errno::Errno, unistd::Pid};
use std::{io, path::Path};
use test_utils::{FakeProc, RecordingTracer};

const PID: Pid = Pid::from_raw(31337);

fn collect(
    tracer: &RecordingTracer,
    options: &memslurp::ScanOptions,
) -> ScanResult<Vec<RegionBytes>> {
    RegionDump::with_tracer(tracer, PID, options)?.collect()
}

struct Unavailable;

impl ReadStrategy for Unavailable {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn read(&self, _: &Path, _: u64, _: usize) -> Result<Vec<u8>, RegionReadError> {
        Err(RegionReadError::Io(io::Error::from_raw_os_error(libc::EIO)))
    }
}

struct Forbidden;

impl ReadStrategy for Forbidden {
    fn name(&self) -> &'static str {
        "forbidden"
    }

    fn read(&self, _: &Path, start: u64, _: usize) -> Result<Vec<u8>, RegionReadError> {
        panic!("region at {:#x} must not be read", start)
    }
}

/// Accepts `budget` bytes, then fails every write.
struct FullDisk {
    written: Vec<u8>,
    budget: usize,
}

impl io::Write for FullDisk {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written.len() + buf.len() > self.budget {
            return Err(io::Error::from_raw_os_error(libc::ENOSPC));
        }
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn single_readable_region() {
    let fake = FakeProc::new();
    fake.write_maps("400000-401000 r-xp 00000000 08:01 1 /bin/x\n");
    fake.poke(0x400000, &[0xaa; 0x1000]);

    let tracer = RecordingTracer::default();
    let regions = collect(&tracer, &fake.options()).unwrap();

    assert_eq!(
        regions,
        vec![RegionBytes {
            start: 0x400000,
            end: 0x401000,
            data: vec![0xaa; 0x1000],
        }]
    );
    assert!(tracer.ops().is_empty());
}

#[test]
fn unreadable_region_is_never_read() {
    let fake = FakeProc::new();
    fake.write_maps("400000-401000 -w-p 00000000 08:01 1 /bin/x\n");
    fake.poke(0x400000, &[0xaa; 0x1000]);

    let tracer = RecordingTracer::default();
    let dump = RegionDump::with_tracer(&tracer, PID, &fake.options())
        .unwrap()
        .with_strategies(vec![Box::new(Forbidden)]);

    let mut out = Vec::new();
    let summary = dump.write_to(&mut out).unwrap();

    assert!(out.is_empty());
    assert_eq!(summary.regions_seen, 1);
    assert_eq!(summary.regions_read, 0);
    assert_eq!(summary.regions_skipped, 1);
}

#[test]
fn oversized_region_is_skipped_and_scan_continues() {
    let fake = FakeProc::new();
    fake.write_maps(
        "400000-600000 r--p 00000000 08:01 1 /bin/big\n\
         700000-701000 rw-p 00000000 00:00 0\n",
    );
    fake.poke(0x400000, &[0x11; 0x1000]);
    fake.poke(0x700000, &[0x22; 0x1000]);

    let tracer = RecordingTracer::default();
    let options = fake.options().with_max_region_size(0x100000);
    let regions = collect(&tracer, &options).unwrap();

    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].start, 0x700000);
    assert_eq!(regions[0].data, vec![0x22; 0x1000]);
}

#[test]
fn empty_and_inverted_regions_are_skipped() {
    let fake = FakeProc::new();
    fake.write_maps(
        "1000-1000 r--p 0 0:0 0\n\
         3000-2000 r--p 0 0:0 0\n\
         4000-5000 r--p 0 0:0 0\n",
    );
    fake.poke(0x4000, &[9; 0x1000]);

    let tracer = RecordingTracer::default();
    let regions = collect(&tracer, &fake.options()).unwrap();
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].start, 0x4000);
}

#[test]
fn failed_attach_aborts_before_reading() {
    let fake = FakeProc::new();
    fake.write_maps("400000-401000 r-xp 00000000 08:01 1 /bin/x\n");
    fake.poke(0x400000, &[0xaa; 0x1000]);

    let tracer = RecordingTracer::failing_attach(Errno::EPERM);
    let options = fake.options().with_attach(true);

    let mut out = Vec::new();
    let result =
        RegionDump::with_tracer(&tracer, PID, &options).and_then(|dump| dump.write_to(&mut out));

    match result {
        Err(ScanError::Attach(err)) => {
            assert_eq!(err.op, TraceOp::Attach);
            assert_eq!(err.pid, PID);
            assert_eq!(err.errno, Errno::EPERM);
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(out.is_empty());
    assert_eq!(tracer.ops(), vec![TraceOp::Attach]);
}

#[test]
fn fallback_strategy_produces_identical_bytes() {
    let fake = FakeProc::new();
    fake.write_maps("400000-401000 r-xp 00000000 08:01 1 /bin/x\n");
    let pattern = (0..0x1000).map(|i| (i % 251) as u8).collect::<Vec<_>>();
    fake.poke(0x400000, &pattern);

    let tracer = RecordingTracer::default();
    let primary = collect(&tracer, &fake.options()).unwrap();
    let fallback = RegionDump::with_tracer(&tracer, PID, &fake.options())
        .unwrap()
        .with_strategies(vec![Box::new(Unavailable), Box::new(MappedRead)])
        .collect::<ScanResult<Vec<_>>>()
        .unwrap();

    assert_eq!(fallback.len(), 1);
    assert_eq!(fallback, primary);
    assert_eq!(fallback[0].data, pattern);
}

#[test]
fn regions_failing_every_strategy_are_skipped() {
    let fake = FakeProc::new();
    fake.write_maps(
        "1000-2000 r--p 0 0:0 0\n\
         3000-4000 r--p 0 0:0 0\n",
    );
    fake.reserve(0x4000);

    let tracer = RecordingTracer::default();
    let dump = RegionDump::with_tracer(&tracer, PID, &fake.options())
        .unwrap()
        .with_strategies(vec![Box::new(Unavailable)]);

    let mut out = Vec::new();
    let summary = dump.write_to(&mut out).unwrap();
    assert!(out.is_empty());
    assert_eq!(summary.regions_seen, 2);
    assert_eq!(summary.regions_skipped, 2);
}

#[test]
fn attach_is_paired_with_one_detach() {
    let fake = FakeProc::new();
    fake.write_maps(
        "400000-401000 r-xp 0 0:0 0\n\
         500000-501000 r--p 0 0:0 0\n",
    );
    // Only the first region is backed, the second one fails to read.
    fake.poke(0x400000, &[1; 0x1000]);

    let tracer = RecordingTracer::default();
    let options = fake.options().with_attach(true);
    let summary = RegionDump::with_tracer(&tracer, PID, &options)
        .unwrap()
        .with_strategies(vec![Box::new(MappedRead)])
        .write_to(&mut io::sink())
        .unwrap();

    assert_eq!(summary.regions_read, 1);
    assert_eq!(summary.regions_skipped, 1);
    assert_eq!(
        *tracer.calls.borrow(),
        vec![(TraceOp::Attach, PID), (TraceOp::Detach, PID)]
    );
}

#[test]
fn abandoned_dump_still_detaches() {
    let fake = FakeProc::new();
    fake.write_maps("400000-401000 r-xp 0 0:0 0\n");
    fake.poke(0x400000, &[1; 0x1000]);

    let tracer = RecordingTracer::default();
    let options = fake.options().with_attach(true);
    {
        let mut dump = RegionDump::with_tracer(&tracer, PID, &options).unwrap();
        assert!(dump.next().is_some());
        assert_eq!(tracer.ops(), vec![TraceOp::Attach]);
    }
    assert_eq!(tracer.ops(), vec![TraceOp::Attach, TraceOp::Detach]);
}

#[test]
fn missing_listing_still_detaches() {
    let fake = FakeProc::new();
    fake.reserve(0x1000);

    let tracer = RecordingTracer::default();
    let options = fake.options().with_attach(true);
    match RegionDump::with_tracer(&tracer, PID, &options) {
        Err(ScanError::MapAccess { path, .. }) => assert_eq!(path, fake.maps_path()),
        Err(err) => panic!("unexpected error: {}", err),
        Ok(_) => panic!("expected an error"),
    }
    assert_eq!(tracer.ops(), vec![TraceOp::Attach, TraceOp::Detach]);
}

#[test]
fn missing_image_is_map_access_error() {
    let fake = FakeProc::new();
    fake.write_maps("400000-401000 r-xp 0 0:0 0\n");

    let tracer = RecordingTracer::default();
    match RegionDump::with_tracer(&tracer, PID, &fake.options()) {
        Err(ScanError::MapAccess { path, .. }) => assert_eq!(path, fake.mem_path()),
        Err(err) => panic!("unexpected error: {}", err),
        Ok(_) => panic!("expected an error"),
    };
    assert!(tracer.ops().is_empty());
}

#[test]
fn failed_detach_does_not_fail_the_scan() {
    let fake = FakeProc::new();
    fake.write_maps("400000-401000 r-xp 0 0:0 0\n");
    fake.poke(0x400000, &[7; 0x1000]);

    let tracer = RecordingTracer::failing_detach(Errno::ESRCH);
    let options = fake.options().with_attach(true);
    let mut out = Vec::new();
    let summary = RegionDump::with_tracer(&tracer, PID, &options)
        .unwrap()
        .write_to(&mut out)
        .unwrap();

    assert_eq!(summary.bytes_written, 0x1000);
    assert_eq!(out, vec![7; 0x1000]);
    assert_eq!(tracer.ops(), vec![TraceOp::Attach, TraceOp::Detach]);
}

#[test]
fn output_is_concatenated_in_listing_order() {
    let fake = FakeProc::new();
    fake.write_maps(
        "600000-600004 rw-p 0 0:0 0\n\
         400000-400003 r--p 0 0:0 0\n\
         500000-500002 ---p 0 0:0 0\n",
    );
    fake.poke(0x400000, b"abc");
    fake.poke(0x500000, b"xx");
    fake.poke(0x600000, b"wxyz");

    let tracer = RecordingTracer::default();
    let mut out = Vec::new();
    let summary = RegionDump::with_tracer(&tracer, PID, &fake.options())
        .unwrap()
        .write_to(&mut out)
        .unwrap();

    assert_eq!(out, b"wxyzabc");
    assert_eq!(summary.regions_seen, 3);
    assert_eq!(summary.regions_read, 2);
    assert_eq!(summary.bytes_written, 7);
}

#[test]
fn short_read_is_accepted() {
    let fake = FakeProc::new();
    fake.write_maps("400000-401000 r--p 0 0:0 0\n");
    fake.poke(0x400000, b"partial");

    let tracer = RecordingTracer::default();
    let regions = collect(&tracer, &fake.options()).unwrap();
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].data, b"partial");
    assert_eq!(regions[0].end, 0x401000);
}

#[test]
fn dump_is_repeatable() {
    let fake = FakeProc::new();
    fake.write_maps(
        "1000-3000 r--p 0 0:0 0\n\
         8000-9000 rw-p 0 0:0 0\n",
    );
    fake.poke(0x1000, &(0..0x2000).map(|i| i as u8).collect::<Vec<_>>());
    fake.poke(0x8000, &[0xee; 0x1000]);

    let tracer = RecordingTracer::default();
    let mut first = Vec::new();
    let mut second = Vec::new();
    RegionDump::with_tracer(&tracer, PID, &fake.options())
        .unwrap()
        .write_to(&mut first)
        .unwrap();
    RegionDump::with_tracer(&tracer, PID, &fake.options())
        .unwrap()
        .write_to(&mut second)
        .unwrap();

    assert_eq!(first.len(), 0x3000);
    assert_eq!(first, second);
}

#[test]
fn output_failure_keeps_earlier_bytes() {
    let fake = FakeProc::new();
    fake.write_maps(
        "1000-1004 r--p 0 0:0 0\n\
         2000-2004 r--p 0 0:0 0\n",
    );
    fake.poke(0x1000, b"good");
    fake.poke(0x2000, b"lost");

    let tracer = RecordingTracer::default();
    let options = fake.options().with_attach(true);
    let mut sink = FullDisk {
        written: Vec::new(),
        budget: 4,
    };
    let result = RegionDump::with_tracer(&tracer, PID, &options)
        .unwrap()
        .write_to(&mut sink);

    match result {
        Err(ScanError::Output(err)) => assert_eq!(err.raw_os_error(), Some(libc::ENOSPC)),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(sink.written, b"good");
    assert_eq!(tracer.ops(), vec![TraceOp::Attach, TraceOp::Detach]);
}

#[test]
fn dump_without_attach_uses_given_paths() {
    let fake = FakeProc::new();
    fake.write_maps("400000-400010 r--p 0 0:0 0\n");
    fake.poke(0x400000, b"0123456789abcdef");

    let mut out = Vec::new();
    let summary = memslurp::dump(Pid::this(), &fake.options(), &mut out).unwrap();
    assert_eq!(out, b"0123456789abcdef");
    assert_eq!(summary.regions_read, 1);
}
