use std::{hint::black_box, sync::Arc, time::Duration};

use coap_smartobject::{
    CoapRouter, ContentFormat, RequestType, SensorResource, SmartObject, SwitchResource,
    device::DeviceId,
    test_utils::{
        create_test_request, create_test_request_with_accept, create_test_request_with_payload,
    },
};

use criterion::{Criterion, criterion_group, criterion_main};
use tower::Service;

fn router_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let device_id = DeviceId::generate("dipi:iot");
    let mut root = SmartObject::new(device_id.clone());
    let humidity = Arc::new(SensorResource::humidity(
        device_id.clone(),
        Duration::from_secs(1),
    ));
    root.add(humidity.clone()).unwrap();
    root.add(Arc::new(SwitchResource::new(device_id, "switch")))
        .unwrap();
    rt.block_on(humidity.refresh(42)).unwrap();

    let mut router = CoapRouter::new(&root, ());

    c.bench_function("get_plain", |b| {
        b.iter(|| rt.block_on(router.call(black_box(create_test_request("humidity")))))
    });

    c.bench_function("get_senml", |b| {
        b.iter(|| {
            rt.block_on(router.call(black_box(create_test_request_with_accept(
                "humidity",
                ContentFormat::ApplicationSenmlJSON,
            ))))
        })
    });

    c.bench_function("put_switch", |b| {
        b.iter(|| {
            rt.block_on(router.call(black_box(create_test_request_with_payload(
                "switch",
                RequestType::Put,
                b"1".to_vec(),
            ))))
        })
    });

    c.bench_function("well_known_core", |b| {
        b.iter(|| rt.block_on(router.call(black_box(create_test_request(".well-known/core")))))
    });
}

criterion_group!(benches, router_benchmark);
criterion_main!(benches);
