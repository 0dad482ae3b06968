//! Periodic refresh as seen through the router

use std::{sync::Arc, time::Duration};

use tower::Service;

use coap_smartobject::{
    CoapRouter, Resource, ResponseType, SensorResource, SmartObject, device::DeviceId,
    test_utils::create_test_request,
};

#[tokio::test(start_paused = true)]
async fn test_reads_follow_the_latest_refresh() {
    let device_id = DeviceId::from("dev");
    let mut root = SmartObject::new(device_id.clone());

    let readings = [12, 15, 99, 0, 37];
    let mut next = readings.into_iter().cycle();
    let temperature = Arc::new(SensorResource::temperature(
        device_id,
        Duration::from_millis(1000),
    ));
    root.add_sensor(temperature.clone(), move || next.next().unwrap_or(0))
        .unwrap();

    let mut router = CoapRouter::new(&root, ());
    tokio::time::sleep(Duration::from_millis(1)).await;

    for expected in readings {
        let response = router
            .call(create_test_request("temperature"))
            .await
            .unwrap();
        assert_eq!(*response.get_status(), ResponseType::Content);
        assert_eq!(response.message.payload, expected.to_string().into_bytes());

        tokio::time::sleep(Duration::from_millis(1000)).await;
    }

    root.shutdown();
    let frozen = temperature.value().current().await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(temperature.value().current().await, frozen);
}

#[tokio::test(start_paused = true)]
async fn test_sensors_refresh_independently() {
    let device_id = DeviceId::from("dev");
    let mut root = SmartObject::new(device_id.clone());

    let fast = Arc::new(SensorResource::temperature(
        device_id.clone(),
        Duration::from_millis(100),
    ));
    let slow = Arc::new(SensorResource::humidity(device_id, Duration::from_secs(10)));

    let mut fast_count = 0;
    root.add_sensor(fast.clone(), move || {
        fast_count += 1;
        fast_count.min(100)
    })
    .unwrap();
    let mut slow_count = 0;
    root.add_sensor(slow.clone(), move || {
        slow_count += 1;
        slow_count
    })
    .unwrap();

    tokio::time::sleep(Duration::from_millis(1050)).await;

    assert_eq!(fast.value().current().await, Some(11));
    assert_eq!(slow.value().current().await, Some(1));

    root.shutdown();
}
