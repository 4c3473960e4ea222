//! Property-based round-trip and skip/fetch-symmetry tests over randomized
//! argument sequences, long enough to overflow either register class.

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use valayout::ArgLayout;
use valist::{RawVaList, VaList, VaListBuilder};

/// One randomized argument, carrying its exact value bytes.
#[derive(Debug, Clone)]
enum Arg {
    Int(i32),
    Long(i64),
    /// Stored as a bit pattern so NaN payloads round-trip comparably.
    Double(u64),
    Ptr(usize),
    /// Two ints, packed in one GP slot.
    Pair32(Vec<u8>),
    /// Two longs, packed in two GP slots (the 16-byte boundary).
    Pair64(Vec<u8>),
    /// Two doubles, one FP slot each.
    Hfa2(Vec<u8>),
    /// Four floats, one FP slot each.
    Hfa4(Vec<u8>),
    /// Five doubles: passed by reference.
    Big(Vec<u8>),
    /// 16-byte-aligned pair of longs: over-aligned when spilled.
    Aligned(Vec<u8>),
}

fn pair32() -> ArgLayout {
    ArgLayout::aggregate(vec![ArgLayout::INT32, ArgLayout::INT32]).unwrap()
}

fn pair64() -> ArgLayout {
    ArgLayout::aggregate(vec![ArgLayout::INT64, ArgLayout::INT64]).unwrap()
}

fn hfa2() -> ArgLayout {
    ArgLayout::aggregate(vec![ArgLayout::FLOAT64, ArgLayout::FLOAT64]).unwrap()
}

fn hfa4() -> ArgLayout {
    let f = ArgLayout::float(4).unwrap();
    ArgLayout::aggregate(vec![f.clone(), f.clone(), f.clone(), f]).unwrap()
}

fn big5() -> ArgLayout {
    let d = ArgLayout::FLOAT64;
    ArgLayout::aggregate(vec![d.clone(), d.clone(), d.clone(), d.clone(), d]).unwrap()
}

fn aligned16() -> ArgLayout {
    ArgLayout::aggregate_with(16, 16, vec![ArgLayout::INT64, ArgLayout::INT64]).unwrap()
}

impl Arg {
    fn layout(&self) -> ArgLayout {
        match self {
            Arg::Int(_) => ArgLayout::INT32,
            Arg::Long(_) => ArgLayout::INT64,
            Arg::Double(_) => ArgLayout::FLOAT64,
            Arg::Ptr(_) => ArgLayout::PTR,
            Arg::Pair32(_) => pair32(),
            Arg::Pair64(_) => pair64(),
            Arg::Hfa2(_) => hfa2(),
            Arg::Hfa4(_) => hfa4(),
            Arg::Big(_) => big5(),
            Arg::Aligned(_) => aligned16(),
        }
    }

    fn add(&self, b: &mut VaListBuilder) {
        match self {
            Arg::Int(v) => {
                b.add_int(*v);
            }
            Arg::Long(v) => {
                b.add_long(*v);
            }
            Arg::Double(bits) => {
                b.add_double(f64::from_bits(*bits));
            }
            Arg::Ptr(v) => {
                b.add_pointer(*v as *const libc::c_void);
            }
            Arg::Pair32(v)
            | Arg::Pair64(v)
            | Arg::Hfa2(v)
            | Arg::Hfa4(v)
            | Arg::Big(v)
            | Arg::Aligned(v) => {
                b.add_aggregate(&self.layout(), v);
            }
        }
    }

    fn check(&self, vl: &mut VaList) -> Result<(), TestCaseError> {
        match self {
            Arg::Int(v) => prop_assert_eq!(vl.next_int(), *v),
            Arg::Long(v) => prop_assert_eq!(vl.next_long(), *v),
            Arg::Double(bits) => prop_assert_eq!(vl.next_double().to_bits(), *bits),
            Arg::Ptr(v) => prop_assert_eq!(vl.next_pointer() as usize, *v),
            Arg::Pair32(v)
            | Arg::Pair64(v)
            | Arg::Hfa2(v)
            | Arg::Hfa4(v)
            | Arg::Big(v)
            | Arg::Aligned(v) => {
                prop_assert_eq!(&*vl.next_aggregate(&self.layout()), &v[..]);
            }
        }
        Ok(())
    }
}

fn bytes(n: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), n)
}

fn arg() -> impl Strategy<Value = Arg> {
    prop_oneof![
        any::<i32>().prop_map(Arg::Int),
        any::<i64>().prop_map(Arg::Long),
        any::<u64>().prop_map(Arg::Double),
        any::<usize>().prop_map(Arg::Ptr),
        bytes(8).prop_map(Arg::Pair32),
        bytes(16).prop_map(Arg::Pair64),
        bytes(16).prop_map(Arg::Hfa2),
        bytes(16).prop_map(Arg::Hfa4),
        bytes(40).prop_map(Arg::Big),
        bytes(16).prop_map(Arg::Aligned),
    ]
}

fn descriptor(vl: &VaList) -> RawVaList {
    unsafe { *(vl.as_raw_ptr() as *const RawVaList) }
}

proptest! {
    #[test]
    fn round_trips_bit_for_bit(args in prop::collection::vec(arg(), 0..24)) {
        let mut b = VaListBuilder::new();
        for a in &args {
            a.add(&mut b);
        }
        let mut vl = b.build();
        for a in &args {
            a.check(&mut vl)?;
        }
    }

    // Skipping the first k arguments must leave the cursors exactly where
    // fetching them would have.
    #[test]
    fn skip_is_cursor_equivalent_to_fetch(
        args in prop::collection::vec(arg(), 1..20),
        split in any::<prop::sample::Index>(),
    ) {
        let k = split.index(args.len() + 1);
        let mut b = VaListBuilder::new();
        for a in &args {
            a.add(&mut b);
        }
        let mut fetched = b.build();
        let mut skipped = fetched.copy();

        let layouts: Vec<ArgLayout> = args[..k].iter().map(Arg::layout).collect();
        skipped.skip(&layouts);
        for a in &args[..k] {
            a.check(&mut fetched)?;
        }

        let df = descriptor(&fetched);
        let ds = descriptor(&skipped);
        prop_assert_eq!(df.stack, ds.stack);
        prop_assert_eq!(df.gr_offs, ds.gr_offs);
        prop_assert_eq!(df.vr_offs, ds.vr_offs);

        for a in &args[k..] {
            a.check(&mut fetched)?;
            a.check(&mut skipped)?;
        }
    }
}
