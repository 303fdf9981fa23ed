//! Recording register windows and delay shared by the integration tests

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use bcm283x_pwm::{
    controller::{Controller, ControllerConfig},
    registers::{Mapper, RegisterWindow, Window},
};
use embedded_hal::delay::DelayNs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Map(Window),
    Unmap(Window),
    Write(Window, usize, u32),
    Delay(u32),
}

/// Ordered log of everything the controller does to the hardware
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<Event>>>);

impl Recorder {
    fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    pub fn writes(&self) -> Vec<(Window, usize, u32)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Write(window, offset, value) => Some((window, offset, value)),
                _ => None,
            })
            .collect()
    }
}

pub struct RecordingWindow {
    window: Window,
    values: HashMap<usize, u32>,
    recorder: Recorder,
}

impl RegisterWindow for RecordingWindow {
    fn read(&self, offset: usize) -> u32 {
        self.values.get(&offset).copied().unwrap_or(0)
    }

    fn write(&mut self, offset: usize, value: u32) {
        self.values.insert(offset, value);
        self.recorder.push(Event::Write(self.window, offset, value));
    }
}

impl Drop for RecordingWindow {
    fn drop(&mut self) {
        self.recorder.push(Event::Unmap(self.window));
    }
}

#[derive(Default)]
pub struct RecordingMapper {
    pub recorder: Recorder,
    pub fail_on: Option<Window>,
}

impl Mapper for RecordingMapper {
    type Window = RecordingWindow;

    fn map(&mut self, window: Window, _base: usize, _len: usize) -> Option<RecordingWindow> {
        if self.fail_on == Some(window) {
            return None;
        }
        self.recorder.push(Event::Map(window));
        Some(RecordingWindow {
            window,
            values: HashMap::new(),
            recorder: self.recorder.clone(),
        })
    }
}

pub struct RecordingDelay(pub Recorder);

impl DelayNs for RecordingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.0.push(Event::Delay(ns / 1_000));
    }

    fn delay_us(&mut self, us: u32) {
        self.0.push(Event::Delay(us));
    }
}

pub type TestController = Controller<RecordingWindow, RecordingDelay>;

/// Starts a controller and clears the mapping events from the log
pub fn start(config: ControllerConfig) -> (TestController, Recorder) {
    let mut mapper = RecordingMapper::default();
    let recorder = mapper.recorder.clone();
    let delay = RecordingDelay(recorder.clone());
    let controller = Controller::new(config, &mut mapper, delay).unwrap();
    recorder.take();
    (controller, recorder)
}
