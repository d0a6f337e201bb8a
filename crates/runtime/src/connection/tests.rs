use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex};

use super::*;

/// Connection plus the driver-side ends: (reader of driver stdin, writer of driver stdout).
fn create_test_connection() -> (Arc<Connection>, mpsc::UnboundedReceiver<Event>, BufReader<DuplexStream>, DuplexStream) {
	let (stdin_read, stdin_write) = duplex(4096);
	let (stdout_read, stdout_write) = duplex(4096);

	let (transport, message_rx) = PipeTransport::new(stdin_write, stdout_read);
	let (connection, events) = Connection::new(transport, message_rx);

	(Arc::new(connection), events, BufReader::new(stdin_read), stdout_write)
}

async fn read_request(reader: &mut BufReader<DuplexStream>) -> Value {
	let mut line = String::new();
	reader.read_line(&mut line).await.unwrap();
	serde_json::from_str(line.trim_end()).unwrap()
}

async fn write_line(writer: &mut DuplexStream, value: Value) {
	let mut bytes = serde_json::to_vec(&value).unwrap();
	bytes.push(b'\n');
	writer.write_all(&bytes).await.unwrap();
	writer.flush().await.unwrap();
}

#[test]
fn test_request_id_increments() {
	let (connection, _, _, _) = create_test_connection();

	let id1 = connection.last_id.fetch_add(1, Ordering::SeqCst);
	let id2 = connection.last_id.fetch_add(1, Ordering::SeqCst);

	assert_eq!(id1, 0);
	assert_eq!(id2, 1);
}

#[tokio::test]
async fn test_response_is_correlated_by_id() {
	let (connection, _events, mut driver_in, mut driver_out) = create_test_connection();
	let runner = Arc::clone(&connection);
	tokio::spawn(async move { runner.run().await });

	let pending = {
		let connection = Arc::clone(&connection);
		tokio::spawn(async move { connection.send_message("sendMessage", serde_json::json!({"to": "1555@c.us"})).await })
	};

	let request = read_request(&mut driver_in).await;
	assert_eq!(request["method"], "sendMessage");
	assert_eq!(request["params"]["to"], "1555@c.us");

	let id = request["id"].as_u64().unwrap();
	write_line(&mut driver_out, serde_json::json!({"id": id, "result": {"id": "msg-1"}})).await;

	let result = pending.await.unwrap().unwrap();
	assert_eq!(result["id"], "msg-1");
}

#[tokio::test]
async fn test_error_response_becomes_remote_error() {
	let (connection, _events, mut driver_in, mut driver_out) = create_test_connection();
	let runner = Arc::clone(&connection);
	tokio::spawn(async move { runner.run().await });

	let pending = {
		let connection = Arc::clone(&connection);
		tokio::spawn(async move { connection.send_message("initialize", Value::Null).await })
	};

	let request = read_request(&mut driver_in).await;
	let id = request["id"].as_u64().unwrap();
	write_line(
		&mut driver_out,
		serde_json::json!({"id": id, "error": {"name": "LaunchError", "message": "browser crashed"}}),
	)
	.await;

	match pending.await.unwrap() {
		Err(Error::Remote { name, message }) => {
			assert_eq!(name, "LaunchError");
			assert_eq!(message, "browser crashed");
		}
		other => panic!("expected remote error, got {other:?}"),
	}
}

#[tokio::test]
async fn test_events_are_forwarded_in_order() {
	let (connection, mut events, _driver_in, mut driver_out) = create_test_connection();
	let runner = Arc::clone(&connection);
	tokio::spawn(async move { runner.run().await });

	write_line(&mut driver_out, serde_json::json!({"method": "qr", "params": {"qr": "a"}})).await;
	write_line(&mut driver_out, serde_json::json!({"method": "authenticated"})).await;
	write_line(&mut driver_out, serde_json::json!({"method": "ready", "params": {"account": {"id": "1@c.us"}}})).await;

	let methods: Vec<String> = vec![
		events.recv().await.unwrap().method,
		events.recv().await.unwrap().method,
		events.recv().await.unwrap().method,
	];
	assert_eq!(methods, ["qr", "authenticated", "ready"]);
}

#[tokio::test]
async fn test_pending_requests_fail_when_driver_exits() {
	let (connection, mut events, mut driver_in, driver_out) = create_test_connection();
	let runner = Arc::clone(&connection);
	let run_task = tokio::spawn(async move { runner.run().await });

	let pending = {
		let connection = Arc::clone(&connection);
		tokio::spawn(async move { connection.send_message("destroy", Value::Null).await })
	};
	let _ = read_request(&mut driver_in).await;

	drop(driver_out);
	run_task.await.unwrap().unwrap();

	assert!(matches!(pending.await.unwrap(), Err(Error::ChannelClosed)));
	assert!(events.recv().await.is_none());
	assert!(connection.is_closed());
	assert!(matches!(connection.send_message("destroy", Value::Null).await, Err(Error::ChannelClosed)));
}

#[tokio::test]
async fn test_timeout_when_driver_is_silent() {
	let (connection, _events, _driver_in, _driver_out) = create_test_connection();
	let runner = Arc::clone(&connection);
	tokio::spawn(async move { runner.run().await });

	let result = connection
		.send_message_with_timeout("initialize", Value::Null, Duration::from_millis(20))
		.await;
	assert!(matches!(result, Err(Error::Timeout(_))));
}

#[tokio::test]
async fn test_run_twice_is_rejected() {
	let (connection, _events, _driver_in, driver_out) = create_test_connection();
	drop(driver_out);
	connection.run().await.unwrap();
	assert!(matches!(connection.run().await, Err(Error::ProtocolError(_))));
}
