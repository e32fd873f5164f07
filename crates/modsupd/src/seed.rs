//! Demo object seeding for a fresh data directory.
//!
//! Registers one demo device with a handful of tags, alarm configs, a
//! subscription, and a schedule, so a new checkout has something to poll
//! against a local Modbus simulator. Refuses to touch a non-empty store.

use modsup_core::model::{
    Channel, DataType, Operator, Protocol, ThreatLevel, Value, WordOrder,
};
use modsup_core::store::{
    NewAlarmConfig, NewDevice, NewSchedule, NewSubscription, NewTag, Store, StoreError,
};
use std::time::Duration;
use tracing::info;

pub fn seed_demo(store: &Store) -> Result<(), StoreError> {
    if !store.devices().is_empty() {
        return Err(StoreError::Validation(
            "store already has devices; refusing to seed demo objects".into(),
        ));
    }

    let device = store.upsert_device(NewDevice {
        alias: "demo-plc".into(),
        host: "127.0.0.1".into(),
        port: 5020,
        protocol: Protocol::Tcp,
        word_order: WordOrder::Big,
        active: true,
    })?;

    let temperature = store.upsert_tag(NewTag {
        device_id: device.id,
        alias: "temperature".into(),
        description: "Boiler temperature, holding register".into(),
        channel: Channel::HoldingRegister,
        data_type: DataType::Int16,
        address: 0,
        unit_id: 1,
        read_amount: 1,
        history_interval: Duration::from_secs(5),
        history_retention: Duration::from_secs(3600),
        active: true,
    })?;

    let flow = store.upsert_tag(NewTag {
        device_id: device.id,
        alias: "flow-rate".into(),
        description: "Coolant flow, float32".into(),
        channel: Channel::HoldingRegister,
        data_type: DataType::Float32,
        address: 10,
        unit_id: 1,
        read_amount: 1,
        history_interval: Duration::from_secs(5),
        history_retention: Duration::from_secs(3600),
        active: true,
    })?;

    let pump = store.upsert_tag(NewTag {
        device_id: device.id,
        alias: "pump-enable".into(),
        description: "Main pump contactor".into(),
        channel: Channel::Coil,
        data_type: DataType::Bool,
        address: 0,
        unit_id: 1,
        read_amount: 1,
        history_interval: Duration::from_secs(60),
        history_retention: Duration::ZERO,
        active: true,
    })?;

    let overheat = store.upsert_alarm_config(NewAlarmConfig {
        tag_id: temperature.id,
        alias: "overheat".into(),
        trigger_value: Value::I64(90),
        operator: Operator::GreaterThan,
        threat_level: ThreatLevel::Critical,
        message: "Boiler overheating - check coolant".into(),
        enabled: true,
        notification_cooldown: Duration::from_secs(60),
    })?;
    store.upsert_alarm_config(NewAlarmConfig {
        tag_id: flow.id,
        alias: "low-flow".into(),
        trigger_value: Value::F64(0.5),
        operator: Operator::LessThan,
        threat_level: ThreatLevel::High,
        message: "Coolant flow low".into(),
        enabled: true,
        notification_cooldown: Duration::from_secs(60),
    })?;

    store.create_subscription(NewSubscription {
        config_id: overheat.id,
        email: "operator@example.com".into(),
        email_enabled: true,
        sms_enabled: false,
    })?;

    store.create_schedule(NewSchedule {
        alias: "morning-pump-on".into(),
        tag_id: pump.id,
        write_value: Value::Bool(true),
        hour: 6,
        minute: 30,
        days: [true, true, true, true, true, false, false],
        enabled: true,
    })?;

    info!(
        "Seeded demo objects: device {} with {} tags",
        device.alias,
        store.tags().len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_once_and_refuses_second_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        seed_demo(&store).unwrap();
        assert_eq!(store.devices().len(), 1);
        assert_eq!(store.tags().len(), 3);
        assert_eq!(store.alarm_configs().len(), 2);
        assert_eq!(store.schedules().len(), 1);

        assert!(seed_demo(&store).is_err());
    }
}
