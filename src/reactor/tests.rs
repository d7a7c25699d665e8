#[cfg(test)]
mod tests {
    use crate::reactor::*;
    use serial_test::serial;
    use std::time::Duration;

    enum TestMsg {
        Note(String),
        Handover(SensorId),
        Quit,
    }

    #[derive(Default)]
    struct Recorder {
        log: Vec<String>,
        victim: Option<TimerKey>,
        peer: Option<WorldHandle<Recorder>>,
    }

    impl WorldState for Recorder {
        type Message = TestMsg;
        type Timer = &'static str;

        fn on_message(&mut self, ctx: &mut WorldContext<'_, Self>, msg: TestMsg) {
            match msg {
                TestMsg::Note(note) => self.log.push(format!("world:{}", note)),
                TestMsg::Handover(id) => {
                    let peer = self.peer.clone().unwrap();
                    ctx.detach(id, &peer).unwrap();
                    peer.send_to(id, TestMsg::Note("moved".into())).unwrap();
                    peer.stop().unwrap();
                    ctx.stop();
                }
                TestMsg::Quit => ctx.stop(),
            }
        }

        fn on_timer(&mut self, ctx: &mut WorldContext<'_, Self>, _key: TimerKey, timer: &'static str) {
            self.log.push(format!("world-timer:{}", timer));
            if timer == "quit" {
                ctx.stop();
            }
        }
    }

    struct Marker {
        name: String,
    }

    impl Marker {
        fn boxed(name: &str) -> Box<Marker> {
            Box::new(Marker {
                name: name.to_string(),
            })
        }
    }

    impl Sensor<Recorder> for Marker {
        fn name(&self) -> &str {
            &self.name
        }

        fn on_timer(
            &mut self,
            state: &mut Recorder,
            ctx: &mut WorldContext<'_, Recorder>,
            _key: TimerKey,
            timer: &'static str,
        ) {
            state.log.push(format!("{}:{}", self.name, timer));
            match timer {
                "leave" => {
                    let me = ctx.current_sensor();
                    assert!(ctx.unregister(me));
                }
                "cancel" => {
                    if let Some(victim) = state.victim.take() {
                        assert!(ctx.cancel_timer(victim).is_some());
                    }
                }
                _ => {}
            }
        }

        fn on_message(&mut self, state: &mut Recorder, _ctx: &mut WorldContext<'_, Recorder>, msg: TestMsg) {
            if let TestMsg::Note(note) = msg {
                state.log.push(format!("{}:{}", self.name, note));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_fire_in_deadline_order() {
        let mut world = EventLoop::new("timers", Recorder::default());
        world.with_context(|_, ctx| {
            let a = ctx.register(Marker::boxed("a"));
            ctx.set_timer_for(a, Duration::from_millis(30), "late");
            ctx.set_timer_for(a, Duration::from_millis(10), "early");
            ctx.set_timer_for(SensorId::WORLD, Duration::from_millis(50), "quit");
        });

        let exit = world.run().await;
        assert_eq!(exit.code, 0);
        assert_eq!(exit.state.log, vec!["a:early", "a:late", "world-timer:quit"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensor_unregisters_itself() {
        let mut world = EventLoop::new("leave", Recorder::default());
        let id = world.with_context(|_, ctx| {
            let a = ctx.register(Marker::boxed("a"));
            ctx.set_timer_for(a, Duration::from_millis(10), "leave");
            ctx.set_timer_for(a, Duration::from_millis(20), "after");
            ctx.set_timer_for(SensorId::WORLD, Duration::from_millis(50), "quit");
            a
        });
        assert_eq!(
            SensorRegistry::global().world_of(id),
            Some(world.handle().id())
        );

        let exit = world.run().await;
        assert_eq!(exit.state.log, vec!["a:leave", "world-timer:quit"]);
        assert!(SensorRegistry::global().lookup(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_in_same_tick_is_skipped() {
        let mut world = EventLoop::new("cancel", Recorder::default());
        world.with_context(|state, ctx| {
            let a = ctx.register(Marker::boxed("a"));
            ctx.set_timer_for(a, Duration::from_millis(10), "cancel");
            state.victim = Some(ctx.set_timer_for(a, Duration::from_millis(10), "victim"));
            ctx.set_timer_for(SensorId::WORLD, Duration::from_millis(50), "quit");
        });

        let exit = world.run().await;
        assert_eq!(exit.state.log, vec!["a:cancel", "world-timer:quit"]);
    }

    #[tokio::test]
    async fn test_disabled_sensor_drops_messages() {
        let mut world = EventLoop::new("disabled", Recorder::default());
        let (on, off) = world.with_context(|_, ctx| {
            let on = ctx.register(Marker::boxed("on"));
            let off = ctx.register(Marker::boxed("off"));
            assert!(ctx.set_enabled(off, false));
            (on, off)
        });
        let handle = world.handle();
        handle.send_to(off, TestMsg::Note("x".into())).unwrap();
        handle.send_to(on, TestMsg::Note("y".into())).unwrap();
        handle.send_message(TestMsg::Note("z".into())).unwrap();
        handle.send_message(TestMsg::Quit).unwrap();

        let exit = world.run().await;
        assert_eq!(exit.state.log, vec!["on:y", "world:z"]);
    }

    #[tokio::test]
    async fn test_turn_dispatches_one_batch() {
        let mut world = EventLoop::new("turns", Recorder::default());
        let handle = world.handle();
        handle.send_message(TestMsg::Note("first".into())).unwrap();
        handle.send_message(TestMsg::Note("second".into())).unwrap();

        world.turn().await;
        assert_eq!(world.state().log, vec!["world:first", "world:second"]);
        assert!(world.is_running());

        handle.send_message(TestMsg::Quit).unwrap();
        world.turn().await;
        assert!(!world.is_running());
    }

    #[tokio::test]
    async fn test_stop_message_ends_loop() {
        let world = EventLoop::new("stop", Recorder::default());
        let handle = world.handle();
        handle.stop().unwrap();
        let exit = world.run().await;
        assert!(exit.state.log.is_empty());
        assert!(handle.send_message(TestMsg::Quit).is_err());
    }

    #[tokio::test]
    async fn test_sensor_handover_between_worlds() {
        let mut from = EventLoop::new("from", Recorder::default());
        let to = EventLoop::new("to", Recorder::default());
        from.state_mut().peer = Some(to.handle());
        let marker = from.with_context(|_, ctx| ctx.register(Marker::boxed("p")));
        from.handle().send_message(TestMsg::Handover(marker)).unwrap();

        let (from_exit, to_exit) = tokio::join!(from.run(), to.run());
        assert!(from_exit.state.log.is_empty());
        assert_eq!(to_exit.state.log, vec!["p:moved"]);
    }

    #[test]
    fn test_spawned_world_runs_on_its_own_thread() {
        struct Echo {
            reply: std::sync::mpsc::Sender<String>,
        }

        impl WorldState for Echo {
            type Message = String;
            type Timer = ();

            fn on_message(&mut self, _ctx: &mut WorldContext<'_, Self>, msg: String) {
                let name = std::thread::current().name().unwrap_or_default().to_string();
                self.reply.send(format!("{}:{}", name, msg)).unwrap();
            }

            fn on_stop(&mut self, _ctx: &mut WorldContext<'_, Self>) {
                self.reply.send("stopped".into()).unwrap();
            }
        }

        let (reply, replies) = std::sync::mpsc::channel();
        let directory = WorldDirectory::new();
        let handle = EventLoop::new("echo-world", Echo { reply })
            .spawn(&directory)
            .unwrap();
        assert!(directory.contains(handle.id()));

        handle.send_message("ping".into()).unwrap();
        let timeout = Duration::from_secs(5);
        assert_eq!(replies.recv_timeout(timeout).unwrap(), "echo-world:ping");

        handle.stop().unwrap();
        assert_eq!(replies.recv_timeout(timeout).unwrap(), "stopped");
        assert_eq!(directory.join(handle.id()).unwrap(), Some(0));
        assert!(directory.is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn test_signal_sensor_runs_handler() {
        let mut world = EventLoop::new("signals", Recorder::default());
        world
            .with_context(|_, ctx| {
                SignalSensor::install(ctx, &[SignalKind::Hangup], |state: &mut Recorder, ctx, kind| {
                    state.log.push(format!("signal:{:?}", kind));
                    ctx.stop();
                })
            })
            .unwrap();

        unsafe {
            libc::raise(libc::SIGHUP);
        }
        let exit = world.run().await;
        assert_eq!(exit.state.log, vec!["signal:Hangup"]);
    }
}
