use std::collections::BTreeMap;

use libsoapysdr::{live_host_allocations, mock, Device, Direction, Error, Kwargs};
use proptest::prelude::*;

#[test]
fn enumerate_then_open_each_result() {
    let found = Device::enumerate_str(mock::abi(), "driver=mock").unwrap();
    assert_eq!(found.len(), mock::SERIALS.len());
    let before = mock::live_allocations();
    let devices = Device::make_list(mock::abi(), &found).unwrap();
    for (dev, args) in devices.iter().zip(&found) {
        let info = dev.hardware_info().unwrap();
        assert_eq!(info.get("serial"), args.get("serial"));
    }
    Device::unmake_list(devices).unwrap();
    assert_eq!(mock::live_allocations(), before);
}

#[test]
fn failed_bulk_open_leaves_nothing_behind() {
    let before = mock::live_allocations();
    let host_before = live_host_allocations();
    let args = [
        Kwargs::from_markup("serial=mock-0"),
        Kwargs::from_markup("serial=mock-1, fail_open=1"),
    ];
    let err = Device::make_list(mock::abi(), &args).unwrap_err();
    assert_eq!(err, Error::Driver("device refused to open".into()));
    assert_eq!(mock::live_allocations(), before);
    assert_eq!(live_host_allocations(), host_before);
}

#[test]
fn tuning_survives_reopen_of_other_device() {
    let a = Device::make_str(mock::abi(), "serial=mock-0").unwrap();
    let b = Device::make_str(mock::abi(), "serial=mock-1").unwrap();
    a.set_frequency(Direction::Rx, 0, 915e6, &Kwargs::new()).unwrap();
    b.unmake().unwrap();
    assert_eq!(a.frequency(Direction::Rx, 0).unwrap(), 915e6);
}

proptest! {
    #[test]
    fn markup_round_trip(map in prop::collection::btree_map("[a-z][a-z0-9_]{0,8}", "[A-Za-z0-9.]{0,10}", 0..8)) {
        let kwargs: Kwargs = map.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let parsed: Kwargs = kwargs.to_string().parse().unwrap();
        prop_assert_eq!(&parsed, &kwargs);
        let back: BTreeMap<String, String> =
            parsed.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        prop_assert_eq!(back, map);
    }

    #[test]
    fn enumerate_filters_never_leak(extra in prop::collection::vec(("[a-z]{1,6}", "[a-z0-9]{0,6}"), 0..6)) {
        let mut filter = Kwargs::new().with("driver", "mock");
        for (k, v) in &extra {
            if k != "driver" && k != "serial" {
                filter.insert(k.as_str(), v.as_str());
            }
        }
        let before = mock::live_allocations();
        let host_before = live_host_allocations();
        let found = Device::enumerate(mock::abi(), &filter).unwrap();
        prop_assert_eq!(found.len(), mock::SERIALS.len());
        prop_assert_eq!(mock::live_allocations(), before);
        prop_assert_eq!(live_host_allocations(), host_before);
    }
}
