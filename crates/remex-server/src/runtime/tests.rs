#[cfg(test)]
mod tests {
    use crate::host::{Host, HostConfig};
    use remex_client::ClientConfig;
    use remex_common::{Address, Value};
    use std::time::Duration;

    const LIBRARY: &str = r#"
        function avg(xs) { return xs.reduce((a, b) => a + b, 0) / xs.length; }
        function add(a, b) { return a + b; }
        var greeting = 'hello';
    "#;

    fn host() -> Host {
        let client = ClientConfig::default()
            .with_max_retries(2)
            .with_retry_delay(Duration::from_millis(20))
            .with_connect_wait(Duration::from_secs(2));
        Host::with_config(HostConfig::default().with_client(client)).unwrap()
    }

    /// A host serving [`LIBRARY`] on loopback; returns it with its port.
    fn library_host() -> (Host, u16) {
        let host = host();
        host.eval(LIBRARY).unwrap();
        let addr = host
            .serve(&Address::new("127.0.0.1", 0))
            .unwrap()
            .unwrap();
        (host, addr.port())
    }

    // ========================================================================
    // remex.connect
    // ========================================================================

    #[test]
    fn test_connect_proxy_evaluates_strings() {
        let (_server, port) = library_host();
        let client = host();

        let result = client
            .eval(&format!("var r = remex.connect('127.0.0.1:{}'); r('1 + 2')", port))
            .unwrap();
        assert_eq!(result, Value::Int(3));
    }

    #[test]
    fn test_connect_proxy_calls_with_symbol_head() {
        let (_server, port) = library_host();
        let client = host();

        let result = client
            .eval(&format!(
                "var r = remex.connect('127.0.0.1:{}'); \
                 var xs = []; for (var i = 0; i < 100; i++) xs.push(i); \
                 r([Symbol('avg'), xs])",
                port
            ))
            .unwrap();
        assert_eq!(result, Value::Float(49.5));
    }

    #[test]
    fn test_connect_proxy_symbol_fetches_function_proxy() {
        let (_server, port) = library_host();
        let client = host();

        let result = client
            .eval(&format!(
                "var r = remex.connect('127.0.0.1:{}'); \
                 var add = r(Symbol('add')); \
                 [typeof add, add.length, add(40, 2), r(Symbol('greeting'))]",
                port
            ))
            .unwrap();
        assert_eq!(
            result,
            Value::List(vec![
                Value::from("function"),
                Value::Int(2),
                Value::Int(42),
                Value::from("hello"),
            ])
        );
    }

    #[test]
    fn test_connect_proxy_unknown_symbol_is_a_string() {
        let (_server, port) = library_host();
        let client = host();

        let result = client
            .eval(&format!(
                "var r = remex.connect('127.0.0.1:{}'); [r([Symbol('nope')]), r('1 + 1')]",
                port
            ))
            .unwrap();
        assert_eq!(
            result,
            Value::List(vec![Value::from("symbol not found: nope"), Value::Int(2)])
        );
    }

    #[test]
    fn test_connect_shares_connection_of_proxy() {
        let (_server, port) = library_host();
        let client = host();

        client
            .eval(&format!("var r = remex.connect('127.0.0.1:{}');", port))
            .unwrap();
        assert_eq!(client.services().client_count(), 1);

        let result = client.eval("var d = remex.connectDict(r); d.get('greeting')").unwrap();
        assert_eq!(result, Value::from("hello"));
        assert_eq!(client.services().client_count(), 1);
    }

    #[test]
    fn test_connect_to_nothing_throws_on_use() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = host();

        let result = client.eval(&format!(
            "var r = remex.connect('127.0.0.1:{}'); \
             try {{ r('1'); 'no error'; }} catch (e) {{ String(e); }}",
            port
        ));
        let message = result.unwrap();
        assert!(
            message.as_str().is_some_and(|m| m.contains("connection not established")),
            "got {:?}",
            message
        );
    }

    // ========================================================================
    // remex.connectDict
    // ========================================================================

    #[test]
    fn test_dict_set_is_chainable_and_visible_to_other_handles() {
        let (server, port) = library_host();
        let client = host();

        let result = client
            .eval(&format!(
                "var a = remex.connectDict('127.0.0.1:{port}'); \
                 var b = remex.connectDict('127.0.0.1:{port}'); \
                 var same = a.set('foo', 2).set('bar', 3) === a; \
                 [same, b.get('foo'), b.get('bar')]",
                port = port
            ))
            .unwrap();
        assert_eq!(
            result,
            Value::List(vec![Value::Bool(true), Value::Int(2), Value::Int(3)])
        );
        assert_eq!(server.lookup("foo").unwrap(), Value::Int(2));
    }

    #[test]
    fn test_dict_get_function_returns_proxy() {
        let (_server, port) = library_host();
        let client = host();

        let result = client
            .eval(&format!(
                "var d = remex.connectDict('127.0.0.1:{}'); d.get('add')(5, 6)",
                port
            ))
            .unwrap();
        assert_eq!(result, Value::Int(11));
    }

    #[test]
    fn test_dict_has_always_throws() {
        let (_server, port) = library_host();
        let client = host();

        let result = client
            .eval(&format!(
                "var d = remex.connectDict('127.0.0.1:{}'); \
                 try {{ d.has('greeting'); 'no error'; }} catch (e) {{ e instanceof TypeError; }}",
                port
            ))
            .unwrap();
        assert_eq!(result, Value::Bool(true));
    }

    #[test]
    fn test_dict_close_and_is_open() {
        let (_server, port) = library_host();
        let client = host();

        let result = client
            .eval(&format!(
                "var d = remex.connectDict('127.0.0.1:{}'); [d.isOpen(), d.close(), d.isOpen(), d.close()]",
                port
            ))
            .unwrap();
        assert_eq!(
            result,
            Value::List(vec![Value::Bool(true), Value::Int(1), Value::Bool(false), Value::Int(0)])
        );
    }

    // ========================================================================
    // remex.close / remex.serve
    // ========================================================================

    #[test]
    fn test_close_reports_whether_it_closed() {
        let (_server, port) = library_host();
        let client = host();

        let result = client
            .eval(&format!(
                "var r = remex.connect('127.0.0.1:{}'); [remex.close(r), remex.close(r), remex.close(42)]",
                port
            ))
            .unwrap();
        assert_eq!(
            result,
            Value::List(vec![Value::Int(1), Value::Int(0), Value::Int(0)])
        );
        assert_eq!(client.services().client_count(), 0);
    }

    #[test]
    fn test_serve_from_script() {
        let host = host();

        let result = host
            .eval("[remex.serve('127.0.0.1:0'), remex.serve('127.0.0.1:0'), remex.serve(0), remex.serve(0)]")
            .unwrap();
        assert_eq!(
            result,
            Value::List(vec![Value::Int(1), Value::Int(0), Value::Int(1), Value::Int(0)])
        );
        assert!(!host.services().server().is_running());
    }

    #[test]
    fn test_serve_bad_spec_throws() {
        let host = host();
        let result = host
            .eval("try { remex.serve('host:notaport'); 'no error'; } catch (e) { 'threw'; }")
            .unwrap();
        assert_eq!(result, Value::from("threw"));
    }

    // ========================================================================
    // remex.async
    // ========================================================================

    #[test]
    fn test_async_runs_after_the_current_evaluation() {
        let host = host();

        let immediate = host
            .eval(
                "var order = []; \
                 var w = remex.async(function (x) { order.push('fn'); return x * 2; }, \
                                     function (r) { order.push('cb:' + r); }); \
                 var first = w(21); order.push('sync'); first",
            )
            .unwrap();
        assert_eq!(immediate, Value::Int(1));
        assert_eq!(host.eval("order.join(',')").unwrap(), Value::from("sync,fn,cb:42"));
    }

    #[test]
    fn test_async_without_functions_throws() {
        let host = host();
        assert!(host.eval("remex.async(1, 2)").is_err());
    }
}
